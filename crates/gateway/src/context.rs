//! External collaborators the core consumes as capabilities: the skills
//! and memory text blocks injected into the system prompt, and the plugin
//! middleware around each turn.

use std::path::PathBuf;

use relay_domain::config::Config;

/// Plugin middleware around a turn. `before_message` may rewrite the user
/// message or return `None` to block it; `after_response` may rewrite the
/// final assistant text.
#[async_trait::async_trait]
pub trait TurnMiddleware: Send + Sync {
    async fn before_message(&self, session_key: &str, message: &str) -> Option<String> {
        let _ = session_key;
        Some(message.to_owned())
    }

    async fn after_response(&self, session_key: &str, content: &str) -> String {
        let _ = session_key;
        content.to_owned()
    }
}

/// Reads the opaque skills/memory text blocks from their configured
/// directories. Missing files and directories are simply empty blocks.
pub struct ContextFiles {
    skills_dir: PathBuf,
    memory_dir: PathBuf,
    shared_memory_dir: Option<PathBuf>,
}

impl ContextFiles {
    pub fn from_config(config: &Config) -> Self {
        Self {
            skills_dir: config.skills.directory.clone(),
            memory_dir: config.memory.directory.clone(),
            shared_memory_dir: config.memory.shared_directory.clone(),
        }
    }

    /// The skills block: the contents of `SKILLS.md` plus one line per
    /// `*.md` skill file in the directory.
    pub fn skills_block(&self) -> String {
        let mut block = read_if_present(&self.skills_dir.join("SKILLS.md"));

        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.skills_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        if stem != "SKILLS" {
                            names.push(stem.to_owned());
                        }
                    }
                }
            }
        }
        names.sort();

        if !names.is_empty() {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str("Available skills: ");
            block.push_str(&names.join(", "));
        }
        block
    }

    /// The memory block: `MEMORY.md` from the agent directory plus the
    /// shared directory when configured.
    pub fn memory_block(&self) -> String {
        let mut block = read_if_present(&self.memory_dir.join("MEMORY.md"));
        if let Some(shared) = &self.shared_memory_dir {
            let shared_text = read_if_present(&shared.join("MEMORY.md"));
            if !shared_text.is_empty() {
                if !block.is_empty() {
                    block.push_str("\n\n");
                }
                block.push_str(&shared_text);
            }
        }
        block
    }

    /// A named file from the memory directory (the heartbeat reads
    /// `HEARTBEAT.md` through this).
    pub fn memory_file(&self, name: &str) -> String {
        read_if_present(&self.memory_dir.join(name))
    }
}

fn read_if_present(path: &std::path::Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_in(dir: &std::path::Path) -> ContextFiles {
        ContextFiles {
            skills_dir: dir.join("skills"),
            memory_dir: dir.join("memory"),
            shared_memory_dir: None,
        }
    }

    #[test]
    fn missing_directories_yield_empty_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = files_in(dir.path());
        assert_eq!(ctx.skills_block(), "");
        assert_eq!(ctx.memory_block(), "");
        assert_eq!(ctx.memory_file("HEARTBEAT.md"), "");
    }

    #[test]
    fn skills_block_lists_md_files() {
        let dir = tempfile::tempdir().unwrap();
        let skills = dir.path().join("skills");
        std::fs::create_dir_all(&skills).unwrap();
        std::fs::write(skills.join("weather.md"), "# weather").unwrap();
        std::fs::write(skills.join("summarize.md"), "# summarize").unwrap();

        let block = files_in(dir.path()).skills_block();
        assert!(block.contains("summarize, weather"));
    }

    #[test]
    fn memory_file_reads_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let memory = dir.path().join("memory");
        std::fs::create_dir_all(&memory).unwrap();
        std::fs::write(memory.join("HEARTBEAT.md"), "check the inbox\n").unwrap();

        assert_eq!(files_in(dir.path()).memory_file("HEARTBEAT.md"), "check the inbox");
    }
}
