//! Subject builders for the agent bus.
//!
//! Kept as a small, exhaustively-tested module so the subject hierarchy is
//! changed in exactly one place — every other crate builds subjects by
//! calling these functions rather than formatting strings inline.

/// `agent.<id>.input` — host → container, one JSON envelope per turn.
pub fn agent_input(agent_id: &str) -> String {
    format!("agent.{agent_id}.input")
}

/// `agent.<id>.output` — container → host, `{type, content}`.
pub fn agent_output(agent_id: &str) -> String {
    format!("agent.{agent_id}.output")
}

/// `agent.*.output` — single host-side subscription that demuxes by the
/// trailing-but-one subject token.
pub fn agent_output_wildcard() -> &'static str {
    "agent.*.output"
}

/// `agent.<id>.control` — host → container request/reply.
pub fn agent_control(agent_id: &str) -> String {
    format!("agent.{agent_id}.control")
}

/// `agent.<id>.route` — host → container request/reply for smart routing.
pub fn agent_route(agent_id: &str) -> String {
    format!("agent.{agent_id}.route")
}

/// `agent.<id>.ready` — container → host, emitted once the in-container bus
/// client has subscribed.
pub fn agent_ready(agent_id: &str) -> String {
    format!("agent.{agent_id}.ready")
}

/// `host.ipc.<id>` — container → host request/reply for in-container tools.
pub fn host_ipc(agent_id: &str) -> String {
    format!("host.ipc.{agent_id}")
}

/// `host.ipc.*` — single host-side subscription for all agents' IPC.
pub fn host_ipc_wildcard() -> &'static str {
    "host.ipc.*"
}

/// `swarm.<id>.chat` — collaborative-cluster chat topic for one swarm run.
pub fn swarm_chat(swarm_id: &str) -> String {
    format!("swarm.{swarm_id}.chat")
}

/// `events.agent.<id>` — real-time event broadcast for one agent.
pub fn events_agent(agent_id: &str) -> String {
    format!("events.agent.{agent_id}")
}

/// `events.swarm.<id>` — real-time event broadcast for one swarm run.
pub fn events_swarm(swarm_id: &str) -> String {
    format!("events.swarm.{swarm_id}")
}

/// `events.>` — UI-facing wildcard subscription over every event subject.
pub fn events_wildcard() -> &'static str {
    "events.>"
}

/// Extracts the agent id from a subject of the form `agent.<id>.<suffix>` or
/// `host.ipc.<id>`. Returns `None` if the subject doesn't have the expected
/// shape.
pub fn agent_id_from_subject(subject: &str, prefix: &str, suffix: Option<&str>) -> Option<String> {
    let rest = subject.strip_prefix(prefix)?.strip_prefix('.')?;
    match suffix {
        Some(suffix) => rest.strip_suffix(suffix)?.strip_suffix('.').map(String::from),
        None => Some(rest.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_exact_strings() {
        assert_eq!(agent_input("coder"), "agent.coder.input");
        assert_eq!(agent_output("coder"), "agent.coder.output");
        assert_eq!(agent_control("coder"), "agent.coder.control");
        assert_eq!(agent_route("coder"), "agent.coder.route");
        assert_eq!(agent_ready("coder"), "agent.coder.ready");
        assert_eq!(host_ipc("coder"), "host.ipc.coder");
        assert_eq!(swarm_chat("s1"), "swarm.s1.chat");
        assert_eq!(events_agent("coder"), "events.agent.coder");
        assert_eq!(events_swarm("s1"), "events.swarm.s1");
        assert_eq!(agent_output_wildcard(), "agent.*.output");
        assert_eq!(host_ipc_wildcard(), "host.ipc.*");
        assert_eq!(events_wildcard(), "events.>");
    }

    #[test]
    fn agent_id_from_subject_parses_output_subject() {
        let id = agent_id_from_subject("agent.coder.output", "agent", Some("output"));
        assert_eq!(id.as_deref(), Some("coder"));
    }

    #[test]
    fn agent_id_from_subject_parses_ipc_subject() {
        let id = agent_id_from_subject("host.ipc.coder", "host.ipc", None);
        assert_eq!(id.as_deref(), Some("coder"));
    }

    #[test]
    fn agent_id_from_subject_rejects_wrong_prefix() {
        assert_eq!(agent_id_from_subject("swarm.s1.chat", "agent", Some("output")), None);
    }
}
