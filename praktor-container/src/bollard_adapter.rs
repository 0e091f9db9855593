use std::io::Read;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures_util::stream::StreamExt;

use crate::adapter::ContainerAdapter;
use crate::error::ContainerError;
use crate::spec::{ContainerHandle, ContainerSpec, ExecOutput};

/// Real Docker control-plane adapter, backed by the local Docker socket.
pub struct BollardContainerAdapter {
    docker: Docker,
}

impl BollardContainerAdapter {
    pub fn connect() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerAdapter for BollardContainerAdapter {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, ContainerError> {
        let env: Vec<String> = spec
            .full_env()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let binds = vec![
            format!("{}:/workspace", spec.workspace_volume),
            format!("{}:/shared:ro", spec.shared_instructions_volume),
            format!("{}:/home/agent", spec.home_volume),
        ];

        let host_config = bollard::models::HostConfig {
            binds: Some(binds),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            user: Some(spec.uid.to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = format!("praktor-agent-{}", spec.agent_id);
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let created = self.docker.create_container(Some(options), config).await?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        Ok(ContainerHandle {
            container_id: created.id,
        })
    }

    async fn stop(&self, container_id: &str) -> Result<(), ContainerError> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await?;
        Ok(())
    }

    async fn is_running(&self, container_id: &str) -> Result<bool, ContainerError> {
        let info = self.docker.inspect_container(container_id, None).await?;
        Ok(info
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        contents: &[u8],
        mode: u32,
    ) -> Result<(), ContainerError> {
        let (dir, file_name) = split_parent(path);
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder
            .append_data(&mut header, file_name, contents)
            .map_err(|e| ContainerError::FileIo(e.to_string()))?;
        let archive = builder
            .into_inner()
            .map_err(|e| ContainerError::FileIo(e.to_string()))?;

        let options = UploadToContainerOptions {
            path: dir,
            no_overwrite_dir_non_dir: "false".to_string(),
        };
        self.docker
            .upload_to_container(container_id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn read_file(&self, container_id: &str, path: &str) -> Result<Vec<u8>, ContainerError> {
        let options = bollard::container::DownloadFromContainerOptions { path: path.to_string() };
        let mut stream = self.docker.download_from_container(container_id, Some(options));
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);
        }
        let mut archive = tar::Archive::new(buf.as_slice());
        let mut entries = archive
            .entries()
            .map_err(|e| ContainerError::FileIo(e.to_string()))?;
        let mut out = Vec::new();
        if let Some(entry) = entries.next() {
            let mut entry = entry.map_err(|e| ContainerError::FileIo(e.to_string()))?;
            entry
                .read_to_end(&mut out)
                .map_err(|e| ContainerError::FileIo(e.to_string()))?;
        }
        Ok(out)
    }

    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecOutput, ContainerError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(|e| ContainerError::ExecFailed(e.to_string()))? {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn split_parent(path: &str) -> (String, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) if !dir.is_empty() => (dir.to_string(), name),
        Some((_, name)) => ("/".to_string(), name),
        None => (".".to_string(), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_parent_handles_nested_and_root_paths() {
        assert_eq!(split_parent("/workspace/notes.md"), ("/workspace".to_string(), "notes.md"));
        assert_eq!(split_parent("/notes.md"), ("/".to_string(), "notes.md"));
        assert_eq!(split_parent("notes.md"), (".".to_string(), "notes.md"));
    }
}
