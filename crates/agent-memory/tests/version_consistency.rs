//! Ensures every workspace member inherits the workspace version and
//! internal dependencies are declared at that same version.

use std::path::{Path, PathBuf};

const MEMBERS: [&str; 3] = [
    "crates/memory-state",
    "crates/agent-memory",
    "crates/agent-memory-cli",
];

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .to_path_buf()
}

fn read_toml(path: &Path) -> toml::Value {
    let text = std::fs::read_to_string(path).unwrap();
    text.parse().unwrap()
}

#[test]
fn all_members_use_workspace_version() {
    let root = workspace_root();
    let workspace = read_toml(&root.join("Cargo.toml"));

    let listed: Vec<&str> = workspace["workspace"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(listed, MEMBERS);

    for member in MEMBERS {
        let manifest = read_toml(&root.join(member).join("Cargo.toml"));
        let inherits = manifest["package"]["version"]
            .get("workspace")
            .and_then(|v| v.as_bool());
        assert_eq!(
            inherits,
            Some(true),
            "{member} should use version.workspace = true"
        );
    }
}

#[test]
fn internal_dependencies_match_workspace_version() {
    let workspace = read_toml(&workspace_root().join("Cargo.toml"));
    let version = workspace["workspace"]["package"]["version"].as_str().unwrap();
    assert_eq!(version, env!("CARGO_PKG_VERSION"));

    for dep in ["memory-state", "agent-memory"] {
        let declared = workspace["workspace"]["dependencies"][dep]["version"]
            .as_str()
            .unwrap();
        assert_eq!(declared, version, "{dep} is pinned to {declared}");
    }
}
