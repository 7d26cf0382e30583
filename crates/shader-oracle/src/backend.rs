use serde::{Deserialize, Serialize};

/// Compiler families recognized by the divergence attribution rules.
///
/// `angle` backends are translation layers sharing a front end; a clean
/// angle-vs-independent split therefore points at the shared layer rather
/// than at a single driver. `android` backends never take part in
/// family-level attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    Independent,
    Angle,
    Android,
}

impl BackendFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Independent => "independent",
            Self::Angle => "angle",
            Self::Android => "android",
        }
    }
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiler/driver configuration, immutable once loaded.
///
/// `code` is assigned in the configuration file, not by a process-wide
/// counter, so fixtures and production configs behave identically. It is
/// used only as a bit index (`1 << code`) inside error signatures; changing
/// the configured backend list or order invalidates stored signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub name: String,
    pub renderer: String,
    pub family: BackendFamily,
    pub code: u32,
    #[serde(default)]
    pub ld_library_path: String,
    #[serde(default)]
    pub vk_icd_filenames: String,
    #[serde(default)]
    pub extra_envs: Vec<String>,
}

impl BackendSpec {
    /// Environment overrides applied to a single tool invocation.
    ///
    /// Nothing here touches the process environment: the returned pairs are
    /// handed to `Command::env` so the override dies with the child.
    pub fn scoped_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if !self.ld_library_path.trim().is_empty() {
            let inherited = std::env::var("LD_LIBRARY_PATH").unwrap_or_default();
            let value = if inherited.is_empty() {
                self.ld_library_path.clone()
            } else {
                format!("{}:{inherited}", self.ld_library_path)
            };
            env.push(("LD_LIBRARY_PATH".to_string(), value));
        }
        if self.family == BackendFamily::Angle {
            env.push(("ANGLE_DEFAULT_PLATFORM".to_string(), "vulkan".to_string()));
        }
        if !self.vk_icd_filenames.trim().is_empty() {
            env.push(("VK_ICD_FILENAMES".to_string(), self.vk_icd_filenames.clone()));
        }
        for extra in &self.extra_envs {
            if let Some((key, value)) = extra.split_once('=') {
                env.push((key.to_string(), value.to_string()));
            }
        }
        env
    }

    /// The signature bit contributed by this backend.
    pub fn bit(&self) -> u64 {
        1u64 << self.code
    }
}

pub fn find_backend<'a>(backends: &'a [BackendSpec], name: &str) -> Option<&'a BackendSpec> {
    backends.iter().find(|backend| backend.name == name)
}
