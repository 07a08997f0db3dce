use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Custom-mode code <-> name table. The codes are autopilot-firmware
/// specific, so the table is injected per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTable {
    by_code: BTreeMap<u32, String>,
}

impl ModeTable {
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (u32, S)>) -> Self {
        Self {
            by_code: entries
                .into_iter()
                .map(|(code, name)| (code, name.into().to_ascii_uppercase()))
                .collect(),
        }
    }

    /// ArduCopter custom modes.
    pub fn arducopter() -> Self {
        Self::new([
            (0, "STABILIZE"),
            (1, "ACRO"),
            (2, "ALT_HOLD"),
            (3, "AUTO"),
            (4, "GUIDED"),
            (5, "LOITER"),
            (6, "RTL"),
            (7, "CIRCLE"),
            (9, "LAND"),
            (11, "DRIFT"),
            (13, "SPORT"),
            (14, "FLIP"),
            (15, "AUTOTUNE"),
            (16, "POSHOLD"),
            (17, "BRAKE"),
            (18, "THROW"),
            (19, "AVOID_ADSB"),
            (20, "GUIDED_NOGPS"),
            (21, "SMART_RTL"),
        ])
    }

    /// Config form: keys are decimal codes.
    pub fn from_config(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut entries = Vec::with_capacity(map.len());
        for (code, name) in map {
            let code: u32 = code
                .trim()
                .parse()
                .with_context(|| format!("mode code {:?} is not a number", code))?;
            anyhow::ensure!(!name.trim().is_empty(), "mode {} has an empty name", code);
            entries.push((code, name.trim().to_string()));
        }
        anyhow::ensure!(!entries.is_empty(), "mode table is empty");
        Ok(Self::new(entries))
    }

    /// Unknown codes come back as the number itself.
    pub fn name_for(&self, code: u32) -> String {
        self.by_code
            .get(&code)
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }

    pub fn code_for(&self, name: &str) -> Option<u32> {
        let name = name.trim();
        self.by_code
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(code, _)| *code)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_code.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::arducopter()
    }
}
