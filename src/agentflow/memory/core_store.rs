//! Core memory: small always-in-context sections per agent.
//!
//! Sections hold things like a user profile or the agent persona. Each
//! section is hard-capped at [`MAX_SECTION_LEN`] characters; an append that
//! would exceed the cap fails without mutating the stored content.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Hard cap per section, in characters.
pub const MAX_SECTION_LEN: usize = 2000;

pub struct CoreStore {
    sections: Mutex<HashMap<Uuid, HashMap<String, String>>>,
}

impl CoreStore {
    pub fn new() -> Self {
        Self {
            sections: Mutex::new(HashMap::new()),
        }
    }

    /// Read one section; empty string when the section does not exist.
    pub fn read(&self, agent_id: Uuid, section: &str) -> String {
        let sections = self.sections.lock().unwrap();
        sections
            .get(&agent_id)
            .and_then(|s| s.get(section))
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a section's content wholesale.
    pub fn update(&self, agent_id: Uuid, section: &str, content: &str) -> Result<(), String> {
        if content.chars().count() > MAX_SECTION_LEN {
            return Err(format!(
                "content exceeds the {} character section cap",
                MAX_SECTION_LEN
            ));
        }
        let mut sections = self.sections.lock().unwrap();
        sections
            .entry(agent_id)
            .or_insert_with(HashMap::new)
            .insert(section.to_string(), content.to_string());
        Ok(())
    }

    /// Append to a section with a newline separator. Over-limit appends
    /// return an error and leave the section untouched.
    pub fn append(&self, agent_id: Uuid, section: &str, content: &str) -> Result<(), String> {
        let mut sections = self.sections.lock().unwrap();
        let agent_sections = sections.entry(agent_id).or_insert_with(HashMap::new);
        let existing = agent_sections.get(section).cloned().unwrap_or_default();
        let combined = if existing.is_empty() {
            content.to_string()
        } else {
            format!("{}\n{}", existing, content)
        };
        if combined.chars().count() > MAX_SECTION_LEN {
            return Err(format!(
                "append would exceed the {} character section cap",
                MAX_SECTION_LEN
            ));
        }
        agent_sections.insert(section.to_string(), combined);
        Ok(())
    }

    /// Remove one section.
    pub fn clear_section(&self, agent_id: Uuid, section: &str) {
        let mut sections = self.sections.lock().unwrap();
        if let Some(agent_sections) = sections.get_mut(&agent_id) {
            agent_sections.remove(section);
        }
    }

    /// Remove every section for an agent.
    pub fn clear(&self, agent_id: Uuid) {
        let mut sections = self.sections.lock().unwrap();
        sections.remove(&agent_id);
    }

    /// List section names for an agent.
    pub fn section_names(&self, agent_id: Uuid) -> Vec<String> {
        let sections = self.sections.lock().unwrap();
        sections
            .get(&agent_id)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for CoreStore {
    fn default() -> Self {
        Self::new()
    }
}
