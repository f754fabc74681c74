//! Read-only probes that verify a checkout is ready to serve.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    process::Command,
};

use crate::config::AppConfig;

pub const MIN_RUST_VERSION: (u32, u32) = (1, 85);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub label: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SetupReport {
    pub sections: Vec<(&'static str, Vec<CheckResult>)>,
}

impl SetupReport {
    pub fn passed(&self) -> bool {
        self.sections
            .iter()
            .flat_map(|(_, checks)| checks)
            .all(|check| check.passed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (title, checks) in &self.sections {
            let _ = writeln!(out, "\n📋 Checking {title}...");
            for check in checks {
                let mark = if check.passed { "✅" } else { "❌" };
                let _ = writeln!(out, "{mark} {} ({})", check.label, check.detail);
            }
        }
        out
    }
}

/// Runs every probe against `root` using the paths from `config`.
pub fn run(root: &Path, config: &AppConfig) -> SetupReport {
    let required = required_paths(config);
    let libtorch = std::env::var_os("LIBTORCH").map(PathBuf::from);

    let rustc = command_output("rustc", "--version");
    let node = command_output("node", "--version");

    SetupReport {
        sections: vec![
            ("Rust toolchain", vec![toolchain_result(rustc.as_deref())]),
            ("directory structure", check_paths(root, &required)),
            (
                "libtorch installation",
                vec![check_dependency_dir(libtorch.as_deref())],
            ),
            ("Node.js", vec![runtime_result("Node.js", node.as_deref())]),
        ],
    }
}

/// Files and directories a runnable checkout needs, relative to its root.
pub fn required_paths(config: &AppConfig) -> Vec<PathBuf> {
    vec![
        PathBuf::from("Cargo.toml"),
        PathBuf::from("src/main.rs"),
        config.tokenizer_path.clone(),
        config.model_path.clone(),
        PathBuf::from("frontend/package.json"),
        PathBuf::from("frontend/node_modules"),
    ]
}

fn command_output(program: &str, arg: &str) -> Option<String> {
    let output = Command::new(program).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parses `rustc 1.86.0 (05f9846f8 2025-03-31)` into `(1, 86, 0)`.
pub fn parse_rustc_version(output: &str) -> Option<(u32, u32, u32)> {
    let version = output.split_whitespace().nth(1)?;
    let core = version.split('-').next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u32>().ok());
    Some((parts.next()??, parts.next()??, parts.next().flatten().unwrap_or(0)))
}

pub fn toolchain_result(output: Option<&str>) -> CheckResult {
    let Some(output) = output else {
        return CheckResult::fail("rustc", "not found");
    };
    match parse_rustc_version(output) {
        Some((major, minor, patch)) => {
            let label = format!("rustc {major}.{minor}.{patch}");
            if (major, minor) >= MIN_RUST_VERSION {
                CheckResult::pass(label, "OK")
            } else {
                let (need_major, need_minor) = MIN_RUST_VERSION;
                CheckResult::fail(label, format!("need {need_major}.{need_minor}+"))
            }
        }
        None => CheckResult::fail("rustc", format!("unrecognised version: {output}")),
    }
}

pub fn check_paths(root: &Path, paths: &[PathBuf]) -> Vec<CheckResult> {
    paths
        .iter()
        .map(|path| {
            let label = path.display().to_string();
            if root.join(path).exists() {
                CheckResult::pass(label, "found")
            } else {
                CheckResult::fail(label, "missing")
            }
        })
        .collect()
}

pub fn check_dependency_dir(dir: Option<&Path>) -> CheckResult {
    match dir {
        Some(dir) if dir.is_dir() => CheckResult::pass("libtorch", dir.display().to_string()),
        Some(dir) => CheckResult::fail("libtorch", format!("{} not found", dir.display())),
        None => CheckResult::fail("libtorch", "LIBTORCH is not set"),
    }
}

pub fn runtime_result(label: &str, version: Option<&str>) -> CheckResult {
    match version {
        Some(version) if !version.is_empty() => CheckResult::pass(format!("{label} {version}"), "OK"),
        _ => CheckResult::fail(label, "not found"),
    }
}
