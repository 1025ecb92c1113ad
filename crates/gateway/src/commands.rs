//! Slash commands, processed before anything reaches the LLM.
//!
//! `handle_command` returns `Some(reply)` for a recognized command and
//! `None` when the text is not a command at all (the caller then runs a
//! normal agent turn).

use crate::runtime::{compact, heartbeat};
use crate::state::AppState;

pub async fn handle_command(state: &AppState, session_key: &str, text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or("");
    let rest: Vec<&str> = parts.collect();
    let arg = rest.first().copied().unwrap_or("");

    let reply = match command {
        "/new" => {
            let _ = state.sessions.reset_session(session_key);
            let _ = state.sessions.save_session(session_key);
            "Started a new conversation.".to_owned()
        }
        "/reset" => {
            let _ = state.sessions.reset_session(session_key);
            let _ = state.sessions.save_session(session_key);
            "Session reset.".to_owned()
        }
        "/factory-reset" => {
            let count = state.sessions.factory_reset();
            state.clients.data_update("sessions", None);
            format!("Factory reset complete ({count} sessions deleted).")
        }
        "/status" => status_text(state, session_key),
        "/compact" => {
            let instructions = if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            };
            match compact::run_compaction(state, session_key, instructions.as_deref()).await {
                Ok(summary) if summary.is_empty() => {
                    "Nothing to compact yet.".to_owned()
                }
                Ok(_) => {
                    state.clients.data_update("sessions", None);
                    "Compacted older history into a summary.".to_owned()
                }
                Err(e) => format!("Compaction failed: {e}"),
            }
        }
        "/session" => match arg {
            "main" => match state.sessions.set_main_session(Some(session_key.to_owned())) {
                Ok(()) => "This session is now the main session.".to_owned(),
                Err(e) => format!("Could not set main session: {e}"),
            },
            _ => "Usage: /session main".to_owned(),
        },
        "/elevated" => match arg {
            "on" | "off" => {
                let on = arg == "on";
                match state.sessions.update_prefs(session_key, |p| p.elevated = on) {
                    Ok(()) => format!("Elevated mode {}.", if on { "on" } else { "off" }),
                    Err(e) => e.to_string(),
                }
            }
            _ => "Usage: /elevated on|off".to_owned(),
        },
        "/model" => {
            if arg.is_empty() {
                let rows: Vec<String> = state
                    .pool()
                    .list_models()
                    .iter()
                    .enumerate()
                    .map(|(i, m)| {
                        format!(
                            "{}{} {} ({})",
                            if m.current { "* " } else { "  " },
                            i,
                            m.name,
                            m.model
                        )
                    })
                    .collect();
                format!("Providers:\n{}", rows.join("\n"))
            } else {
                match state.pool().switch_model(arg) {
                    Some(status) => format!("Switched to {} ({}).", status.name, status.model),
                    None => format!("No provider or model matching \"{arg}\"."),
                }
            }
        }
        "/context" => {
            let tokens = state.sessions.estimate_tokens(session_key).unwrap_or(0);
            let limit = state.config.get().sessions.context_limit;
            let percent = (tokens as f64 / limit as f64 * 100.0).min(100.0);
            let count = state.sessions.message_count(session_key).unwrap_or(0);
            format!("Context: ~{tokens} tokens of {limit} ({percent:.1}%), {count} messages.")
        }
        "/index" => index_command(state, arg),
        "/heartbeat" => heartbeat_command(state, arg).await,
        "/think" => match arg {
            "off" | "minimal" | "low" | "medium" | "high" => {
                let level = arg.to_owned();
                match state
                    .sessions
                    .update_prefs(session_key, |p| p.think = level.clone())
                {
                    Ok(()) => format!("Thinking level set to {arg}."),
                    Err(e) => e.to_string(),
                }
            }
            _ => "Usage: /think off|minimal|low|medium|high".to_owned(),
        },
        "/verbose" => match arg {
            "on" | "off" => {
                let on = arg == "on";
                match state.sessions.update_prefs(session_key, |p| p.verbose = on) {
                    Ok(()) => format!("Verbose {}.", if on { "on" } else { "off" }),
                    Err(e) => e.to_string(),
                }
            }
            _ => "Usage: /verbose on|off".to_owned(),
        },
        "/usage" => match arg {
            "off" | "tokens" | "full" => {
                let mode = arg.to_owned();
                match state
                    .sessions
                    .update_prefs(session_key, |p| p.usage_mode = mode.clone())
                {
                    Ok(()) => format!("Usage reporting set to {arg}."),
                    Err(e) => e.to_string(),
                }
            }
            _ => "Usage: /usage off|tokens|full".to_owned(),
        },
        "/repair" => match state.sessions.repair_tool_pairs(session_key) {
            Ok(0) => "No orphaned tool messages found.".to_owned(),
            Ok(n) => {
                let _ = state.sessions.save_session(session_key);
                format!("Removed {n} orphaned tool message(s).")
            }
            Err(e) => e.to_string(),
        },
        "/help" => HELP_TEXT.to_owned(),
        _ => return None,
    };

    Some(reply)
}

fn status_text(state: &AppState, session_key: &str) -> String {
    let pool = state.pool();
    let stats = state.registry.stats();
    let heartbeat_state = if state.heartbeat.is_enabled() { "on" } else { "off" };
    format!(
        "Uptime: {}s\nModel: {}\nSessions: {}\nClients: {}\nProcessing: {}\nTools: {} core, {} deferred, {} dynamic\nHeartbeat: {}",
        state.uptime_secs(),
        pool.current_model(),
        state.sessions.session_count(),
        state.clients.client_count(),
        if state.locks.is_processing(session_key) { "yes" } else { "no" },
        stats.core,
        stats.deferred,
        stats.dynamic,
        heartbeat_state,
    )
}

fn index_command(state: &AppState, arg: &str) -> String {
    let config = state.config.get();
    match arg {
        "status" | "" => {
            let embedding = &config.memory.embedding;
            if embedding.enabled {
                format!(
                    "Index: enabled (model {}, top_k {}).",
                    embedding.model, embedding.top_k
                )
            } else {
                "Index: disabled.".to_owned()
            }
        }
        // The index itself is an external collaborator; these only answer
        // for it.
        "on" => "Index enable requested — set memory.embedding.enabled in config to persist.".to_owned(),
        "off" => "Index disable requested — set memory.embedding.enabled in config to persist.".to_owned(),
        "rebuild" => "Index rebuild requested.".to_owned(),
        _ => "Usage: /index on|off|status|rebuild".to_owned(),
    }
}

async fn heartbeat_command(state: &AppState, arg: &str) -> String {
    match arg {
        "on" => {
            state.heartbeat.set_enabled(true);
            "Heartbeat on.".to_owned()
        }
        "off" => {
            state.heartbeat.set_enabled(false);
            "Heartbeat off.".to_owned()
        }
        "force" | "now" => {
            let record = heartbeat::run_once(state, true).await;
            format!("Heartbeat ran: {} ({}).", record.outcome.as_str(), record.detail)
        }
        "status" | "" => match state.heartbeat.last_record() {
            Some(record) => format!(
                "Heartbeat {} — last: {} at {}.",
                if state.heartbeat.is_enabled() { "on" } else { "off" },
                record.outcome.as_str(),
                record.at.to_rfc3339(),
            ),
            None => format!(
                "Heartbeat {} — never run.",
                if state.heartbeat.is_enabled() { "on" } else { "off" }
            ),
        },
        _ => "Usage: /heartbeat on|off|force|status|now".to_owned(),
    }
}

const HELP_TEXT: &str = "Commands:\n\
/new — start a new conversation\n\
/reset — clear this session's history\n\
/factory-reset — delete all sessions\n\
/status — gateway status\n\
/compact [instructions] — summarize older history\n\
/session main — make this the main session\n\
/elevated on|off — toggle elevated mode\n\
/model [name|index] — list or switch providers\n\
/context — context window usage\n\
/index on|off|status|rebuild — memory index\n\
/heartbeat on|off|force|status|now — heartbeat control\n\
/think off|minimal|low|medium|high — thinking level\n\
/verbose on|off — verbose replies\n\
/usage off|tokens|full — usage reporting\n\
/repair — remove orphaned tool messages\n\
/help — this help";
