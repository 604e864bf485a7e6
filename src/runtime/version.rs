use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Version and build reported by the runtime executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub build: String,
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self {
            version: "unknown".to_string(),
            build: "unknown".to_string(),
        }
    }
}

// A literal pattern, always compiles.
static VERSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\S+ version ([^\s,]+), build (\S+)\s*$").expect("version pattern compiles")
});

/// Parse `"<name> version <version>, build <hash>"`
pub fn parse_version_line(line: &str) -> Option<RuntimeInfo> {
    let captures = VERSION_LINE.captures(line)?;
    Some(RuntimeInfo {
        version: captures[1].to_string(),
        build: captures[2].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_pattern_compiles() {
        assert_eq!(VERSION_LINE.captures_len(), 3);
    }

    #[test]
    fn test_parse_docker_version() {
        let info = parse_version_line("Docker version 24.0.7, build afdd53b").unwrap();
        assert_eq!(info.version, "24.0.7");
        assert_eq!(info.build, "afdd53b");
    }

    #[test]
    fn test_parse_any_runtime_name() {
        let info = parse_version_line("nerdctl version 1.7.2, build 0a5f3a1\n").unwrap();
        assert_eq!(info.version, "1.7.2");
        assert_eq!(info.build, "0a5f3a1");
    }

    #[test]
    fn test_rejects_other_formats() {
        assert!(parse_version_line("podman version 4.9.3").is_none());
        assert!(parse_version_line("").is_none());
        assert!(parse_version_line("version 1, build 2").is_none());
    }

    #[test]
    fn test_default_is_unknown() {
        let info = RuntimeInfo::default();
        assert_eq!(info.version, "unknown");
        assert_eq!(info.build, "unknown");
    }
}
