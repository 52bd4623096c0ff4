//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Build and version metadata."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Version details stamped at build time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub semver: String,
    pub git_sha: String,
    pub build_timestamp: String,
    pub profile: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("VERGEN_GIT_SHA").unwrap_or("unknown").to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("unknown")
                .to_owned(),
            profile: option_env!("VERGEN_CARGO_DEBUG")
                .map(|debug| if debug == "true" { "debug" } else { "release" })
                .unwrap_or("unknown")
                .to_owned(),
        }
    }

    /// Short form used in CLI banners and the status endpoint.
    pub fn cli_string(&self) -> String {
        let short_sha: String = self.git_sha.chars().take(8).collect();
        format!("{} ({})", self.semver, short_sha)
    }

    pub fn extended(&self) -> String {
        format!(
            "gridsim {}\ncommit: {}\nbuilt: {}\nprofile: {}",
            self.semver, self.git_sha, self.build_timestamp, self.profile
        )
    }
}
