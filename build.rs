use std::path::{Path, PathBuf};
use std::process::Command;

const MAX_LINES: usize = 750;

const EXCLUDED_DIRS: &[&str] = &["target", ".git", "node_modules"];

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/main");
    println!("cargo:rerun-if-changed=.git/packed-refs");

    let sha = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=METERBAR_GIT_SHA={}", sha);

    let timestamp = git(&["show", "-s", "--format=%ct", "HEAD"])
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    println!("cargo:rustc-env=METERBAR_BUILD_TIMESTAMP={}", timestamp);

    let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let files = rust_sources(&Path::new(&manifest_dir).join("src"));
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    enforce_line_limits(&files);
    enforce_no_dead_code_allows(&files);
    enforce_serial_for_env_mutations(&files);
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    walk_directory(dir, &mut files);
    files.sort();
    files
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let excluded = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| EXCLUDED_DIRS.contains(&name));
            if !excluded {
                walk_directory(&path, files);
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
            files.push(path);
        }
    }
}

fn report(title: &str, violations: &[(PathBuf, usize, String)], advice: &[&str]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n========================================");
    eprintln!("{}", title);
    eprintln!("========================================");
    for (path, line, message) in violations {
        eprintln!("  {}:{}", path.display(), line);
        eprintln!("    {}", message);
    }
    eprintln!();
    for line in advice {
        eprintln!("{}", line);
    }
    eprintln!("========================================\n");
    panic!("Build failed: {} ({} occurrence(s))", title, violations.len());
}

fn enforce_line_limits(files: &[PathBuf]) {
    let violations: Vec<_> = files
        .iter()
        .filter_map(|file| {
            let content = std::fs::read_to_string(file).ok()?;
            let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
            (lines > MAX_LINES).then(|| {
                (
                    file.clone(),
                    lines,
                    format!("{} non-empty lines (max {})", lines, MAX_LINES),
                )
            })
        })
        .collect();
    report(
        "FILE LINE LIMIT EXCEEDED",
        &violations,
        &["Please split these files into smaller modules."],
    );
}

fn enforce_no_dead_code_allows(files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if (trimmed.starts_with("#[allow(") || trimmed.starts_with("#![allow("))
                && trimmed.contains("dead_code")
            {
                violations.push((file.clone(), i + 1, trimmed.to_string()));
            }
        }
    }
    report(
        "#[allow(dead_code)] IS NOT ALLOWED",
        &violations,
        &[
            "Delete unused code instead of silencing the warning.",
            "If the code is only for tests, gate it with #[cfg(test)].",
        ],
    );
}

/// Tests that mutate the process environment must run under `#[serial]`.
fn enforce_serial_for_env_mutations(files: &[PathBuf]) {
    let mut violations = Vec::new();
    for file in files {
        let Ok(content) = std::fs::read_to_string(file) else {
            continue;
        };
        let mut has_serial = false;
        let mut test_start: Option<usize> = None;
        let mut depth: i32 = 0;
        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed == "#[serial]" || trimmed == "#[serial_test::serial]" {
                has_serial = true;
            }
            if trimmed == "#[test]" || trimmed.starts_with("#[tokio::test") {
                test_start = Some(i + 1);
                depth = 0;
                continue;
            }
            let Some(start) = test_start else {
                continue;
            };
            if !trimmed.starts_with("//")
                && (trimmed.contains("env::set_var") || trimmed.contains("env::remove_var"))
                && !has_serial
            {
                violations.push((
                    file.clone(),
                    start,
                    "test mutates env without #[serial]".to_string(),
                ));
                test_start = None;
                continue;
            }
            for c in line.chars() {
                match c {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if depth == 0 && line.contains('}') {
                test_start = None;
                has_serial = false;
            }
        }
    }
    report(
        "ENV MUTATIONS REQUIRE #[serial]",
        &violations,
        &["Add #[serial] from serial_test to tests that call set_var or remove_var."],
    );
}
