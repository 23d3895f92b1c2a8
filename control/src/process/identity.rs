//! Resolves a [`MatchSpec`] to the live processes that are "this app".
//!
//! A cached pid is never trusted: every resolution runs against a fresh
//! snapshot. Script apps are matched on their exact argument vector so two
//! scripts under the same interpreter are never conflated.

use std::collections::HashMap;
use std::path::Path;

use crate::model::MatchSpec;
use crate::process::ProcessInfo;

/// Result of resolving one app against a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// First launched match (lowest start time, then lowest pid).
    pub canonical: Option<ProcessInfo>,
    /// Further independent matches, cleaned up on the next stop.
    pub orphans: Vec<ProcessInfo>,
}

impl MatchResult {
    pub fn is_running(&self) -> bool {
        self.canonical.is_some()
    }

    /// Canonical first, then orphans.
    pub fn all(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.canonical.iter().chain(self.orphans.iter())
    }
}

/// Several processes matched one app. Logged, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAmbiguity {
    pub app: String,
    pub canonical: u32,
    pub orphans: Vec<u32>,
}

impl std::fmt::Display for MatchAmbiguity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' matched {} processes; using pid {} and flagging {:?} for cleanup",
            self.app,
            self.orphans.len() + 1,
            self.canonical,
            self.orphans
        )
    }
}

impl MatchResult {
    pub fn ambiguity(&self, app: &str) -> Option<MatchAmbiguity> {
        let canonical = self.canonical.as_ref()?;
        if self.orphans.is_empty() {
            return None;
        }
        Some(MatchAmbiguity {
            app: app.to_string(),
            canonical: canonical.pid,
            orphans: self.orphans.iter().map(|p| p.pid).collect(),
        })
    }
}

/// Resolves `spec` against `snapshot`, ignoring `exclude_pid` (the caller).
///
/// Matches that descend from another match (a shell wrapper and its worker)
/// belong to that match's tree and are not reported as orphans.
pub fn resolve(
    spec: &MatchSpec,
    cwd: Option<&Path>,
    snapshot: &[ProcessInfo],
    exclude_pid: u32,
) -> MatchResult {
    if spec.is_empty() {
        return MatchResult::default();
    }

    let mut matched: Vec<&ProcessInfo> = snapshot
        .iter()
        .filter(|p| p.pid != exclude_pid && matches(spec, cwd, p))
        .collect();
    if matched.is_empty() {
        return MatchResult::default();
    }
    matched.sort_by_key(|p| (p.start_time, p.pid));

    let parents: HashMap<u32, Option<u32>> = snapshot.iter().map(|p| (p.pid, p.ppid)).collect();
    let matched_pids: Vec<u32> = matched.iter().map(|p| p.pid).collect();
    let roots: Vec<&ProcessInfo> = matched
        .into_iter()
        .filter(|p| !has_matched_ancestor(p.pid, &parents, &matched_pids))
        .collect();

    let mut roots = roots.into_iter().cloned();
    MatchResult {
        canonical: roots.next(),
        orphans: roots.collect(),
    }
}

fn has_matched_ancestor(pid: u32, parents: &HashMap<u32, Option<u32>>, matched: &[u32]) -> bool {
    let mut current = parents.get(&pid).copied().flatten();
    // Bounded walk: a malformed snapshot must not loop forever.
    for _ in 0..parents.len() {
        let Some(parent) = current else {
            return false;
        };
        if parent == pid {
            return false;
        }
        if matched.contains(&parent) {
            return true;
        }
        current = parents.get(&parent).copied().flatten();
    }
    false
}

/// True when every populated criterion of `spec` holds for `process`.
pub fn matches(spec: &MatchSpec, cwd: Option<&Path>, process: &ProcessInfo) -> bool {
    if spec.is_empty() {
        return false;
    }
    if let Some(name) = &spec.process_name {
        if image_name(name) != image_name(&process.name) {
            return false;
        }
    }
    if let Some(expected) = &spec.executable {
        if !executable_matches(expected, cwd, process) {
            return false;
        }
    }
    if let Some(needle) = &spec.cmdline_contains {
        let needle = normalize_cmdline(needle);
        if needle.is_empty() || !normalize_cmdline(&process.argv.join(" ")).contains(&needle) {
            return false;
        }
    }
    if let Some(argv) = &spec.argv {
        if !argv_matches(argv, &process.argv, cwd) {
            return false;
        }
    }
    true
}

/// A bare name (`rclone.exe`, resolved through `PATH`) matches by image name;
/// a relative path is taken from `cwd`; anything else must equal the image path.
fn executable_matches(expected: &Path, cwd: Option<&Path>, process: &ProcessInfo) -> bool {
    let expected_norm = normalize_path(&expected.to_string_lossy());
    let anchored = if !expected_norm.contains('/') {
        None
    } else if looks_absolute(&expected_norm) {
        Some(expected_norm.clone())
    } else {
        cwd.map(|dir| normalize_path(&dir.join(&expected_norm).to_string_lossy()))
    };

    match (anchored, &process.exe) {
        (Some(path), Some(actual)) => normalize_path(&actual.to_string_lossy()) == path,
        // Access denied on the image path, or nothing to anchor the name to.
        _ => {
            let wanted = image_name(&file_name(&expected_norm));
            let argv0 = process.argv.first().map(|a| file_name(&normalize_path(a)));
            image_name(&process.name) == wanted
                || process
                    .exe
                    .as_ref()
                    .is_some_and(|e| image_name(&file_name(&normalize_path(&e.to_string_lossy()))) == wanted)
                || argv0.is_some_and(|a| image_name(&a) == wanted)
        }
    }
}

/// `C:/...` counts as absolute on every platform.
fn looks_absolute(path: &str) -> bool {
    path.starts_with('/') || path.as_bytes().get(1) == Some(&b':')
}

fn argv_matches(expected: &[String], actual: &[String], cwd: Option<&Path>) -> bool {
    if expected.is_empty() || expected.len() != actual.len() {
        return false;
    }
    if !program_matches(&expected[0], &actual[0]) {
        return false;
    }
    expected[1..]
        .iter()
        .zip(&actual[1..])
        .all(|(e, a)| arg_matches(e, a, cwd))
}

/// A bare program name (`pythonw`, `rclone.exe`) matches any path to it; a
/// program given with a directory must match that path.
fn program_matches(expected: &str, actual: &str) -> bool {
    let expected_norm = normalize_path(expected);
    if expected_norm.contains('/') {
        return expected_norm == normalize_path(actual);
    }
    image_name(&expected_norm) == image_name(&file_name(&normalize_path(actual)))
}

fn arg_matches(expected: &str, actual: &str, cwd: Option<&Path>) -> bool {
    let expected_norm = normalize_path(expected);
    let actual_norm = normalize_path(actual);
    if expected_norm == actual_norm {
        return true;
    }
    // A relative script path in the registry against an absolute one in argv.
    match cwd {
        Some(dir) if Path::new(expected).is_relative() && Path::new(actual).is_absolute() => {
            normalize_path(&dir.join(expected).to_string_lossy()) == actual_norm
        }
        _ => false,
    }
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Lowercased image name without a trailing `.exe`.
fn image_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    lower.strip_suffix(".exe").map(str::to_string).unwrap_or(lower)
}

/// Forward slashes, no `./` prefix, no trailing slash, case-folded on Windows.
fn normalize_path(raw: &str) -> String {
    let mut s = raw.trim().trim_matches('"').replace('\\', "/");
    while let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    if cfg!(windows) {
        s.to_lowercase()
    } else {
        s
    }
}

/// Lowercased, quote-free, single-spaced, forward-slashed command line.
fn normalize_cmdline(raw: &str) -> String {
    raw.replace('"', "")
        .replace('\\', "/")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn proc(pid: u32, ppid: Option<u32>, name: &str, argv: &[&str], start: u64) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid,
            name: name.into(),
            exe: None,
            argv: argv.iter().map(|s| s.to_string()).collect(),
            start_time: start,
            cpu_percent: 0.0,
            memory_bytes: 0,
        }
    }

    fn argv_spec(argv: &[&str]) -> MatchSpec {
        MatchSpec {
            argv: Some(argv.iter().map(|s| s.to_string()).collect()),
            ..MatchSpec::default()
        }
    }

    // ── script identity ───────────────────────────────────────────────────────

    #[test]
    fn scripts_under_one_interpreter_are_not_conflated() {
        let snapshot = vec![
            proc(10, None, "pythonw.exe", &[r"C:\Python\pythonw.exe", r"C:\tools\other.py"], 1),
            proc(11, None, "pythonw.exe", &[r"C:\Python\pythonw.exe", r"C:\tools\wallch.py", "--interval", "60"], 2),
        ];
        let mut spec = argv_spec(&["pythonw", r"C:\tools\wallch.py", "--interval", "60"]);
        let result = resolve(&spec, None, &snapshot, 0);
        assert_eq!(result.canonical.unwrap().pid, 11);
        assert!(result.orphans.is_empty());

        spec = argv_spec(&["pythonw", r"C:\tools\wallch.py"]);
        assert!(!resolve(&spec, None, &snapshot, 0).is_running());
    }

    #[test]
    fn relative_script_matches_absolute_argv_via_cwd() {
        let snapshot = vec![proc(5, None, "python3", &["/usr/bin/python3", "/srv/bot/main.py"], 1)];
        let spec = argv_spec(&["python3", "main.py"]);
        assert!(resolve(&spec, Some(Path::new("/srv/bot")), &snapshot, 0).is_running());
        assert!(!resolve(&spec, Some(Path::new("/srv/other")), &snapshot, 0).is_running());
    }

    #[test]
    fn program_with_directory_requires_that_path() {
        let snapshot = vec![proc(5, None, "node", &["/opt/node18/bin/node", "server.js"], 1)];
        assert!(resolve(&argv_spec(&["/opt/node18/bin/node", "server.js"]), None, &snapshot, 0).is_running());
        assert!(!resolve(&argv_spec(&["/opt/node20/bin/node", "server.js"]), None, &snapshot, 0).is_running());
        assert!(resolve(&argv_spec(&["node", "server.js"]), None, &snapshot, 0).is_running());
    }

    // ── executable / command identity ─────────────────────────────────────────

    #[test]
    fn executable_matches_normalized_path() {
        let mut p = proc(7, None, "player.exe", &["player.exe"], 1);
        p.exe = Some(PathBuf::from(r"C:\Apps\player.exe"));
        let spec = MatchSpec {
            executable: Some(PathBuf::from("C:/Apps/player.exe")),
            ..MatchSpec::default()
        };
        assert!(matches(&spec, None, &p));
    }

    #[test]
    fn executable_falls_back_to_image_name_without_exe_path() {
        let p = proc(7, None, "Player.EXE", &[], 1);
        let spec = MatchSpec {
            executable: Some(PathBuf::from("/apps/player.exe")),
            ..MatchSpec::default()
        };
        assert!(matches(&spec, None, &p));
    }

    #[test]
    fn bare_executable_name_matches_resolved_image() {
        let mut p = proc(7, None, "sleep", &["sleep", "37"], 1);
        p.exe = Some(PathBuf::from("/usr/bin/sleep"));
        let spec = MatchSpec {
            executable: Some(PathBuf::from("sleep")),
            ..MatchSpec::default()
        };
        assert!(matches(&spec, None, &p));

        let mut other = proc(8, None, "rclone", &["rclone"], 1);
        other.exe = Some(PathBuf::from("/usr/bin/rclone"));
        assert!(!matches(&spec, None, &other));
    }

    #[test]
    fn relative_executable_is_anchored_at_cwd() {
        let mut p = proc(7, None, "app", &["tools/app"], 1);
        p.exe = Some(PathBuf::from("/srv/bot/tools/app"));
        let spec = MatchSpec {
            executable: Some(PathBuf::from("./tools/app")),
            ..MatchSpec::default()
        };
        assert!(matches(&spec, Some(Path::new("/srv/bot")), &p));
        assert!(!matches(&spec, Some(Path::new("/srv/other")), &p));
    }

    #[test]
    fn cmdline_substring_ignores_quotes_and_spacing() {
        let p = proc(3, None, "cmd.exe", &["cmd", "/C", "\"rclone\"", "mount", "X:", "  Y:"], 1);
        let spec = MatchSpec {
            cmdline_contains: Some("rclone mount x: y:".into()),
            ..MatchSpec::default()
        };
        assert!(matches(&spec, None, &p));
    }

    #[test]
    fn all_criteria_must_hold() {
        let p = proc(3, None, "rclone", &["rclone", "mount", "X:", "Y:"], 1);
        let spec = MatchSpec {
            process_name: Some("rclone".into()),
            cmdline_contains: Some("mount Z:".into()),
            ..MatchSpec::default()
        };
        assert!(!matches(&spec, None, &p));
    }

    #[test]
    fn empty_spec_matches_nothing() {
        let p = proc(3, None, "anything", &["anything"], 1);
        assert!(!matches(&MatchSpec::default(), None, &p));
    }

    // ── canonical / orphans ───────────────────────────────────────────────────

    #[test]
    fn earliest_start_is_canonical_and_rest_are_orphans() {
        let snapshot = vec![
            proc(30, None, "rclone", &["rclone", "mount", "X:", "Y:"], 300),
            proc(20, None, "rclone", &["rclone", "mount", "X:", "Y:"], 100),
            proc(25, None, "rclone", &["rclone", "mount", "X:", "Y:"], 200),
        ];
        let result = resolve(&argv_spec(&["rclone", "mount", "X:", "Y:"]), None, &snapshot, 0);
        assert_eq!(result.canonical.as_ref().unwrap().pid, 20);
        let orphans: Vec<_> = result.orphans.iter().map(|p| p.pid).collect();
        assert_eq!(orphans, vec![25, 30]);

        let warning = result.ambiguity("sync").unwrap();
        assert_eq!(warning.canonical, 20);
        assert!(warning.to_string().contains("3 processes"));
    }

    #[test]
    fn start_time_ties_break_on_pid() {
        let snapshot = vec![
            proc(9, None, "a", &["a"], 5),
            proc(4, None, "a", &["a"], 5),
        ];
        let result = resolve(&argv_spec(&["a"]), None, &snapshot, 0);
        assert_eq!(result.canonical.unwrap().pid, 4);
    }

    #[test]
    fn wrapper_child_is_not_an_orphan() {
        let snapshot = vec![
            proc(100, None, "cmd.exe", &["cmd", "/C", "rclone", "mount", "X:", "Y:"], 1),
            proc(101, Some(100), "rclone.exe", &["rclone", "mount", "X:", "Y:"], 2),
        ];
        let spec = MatchSpec {
            cmdline_contains: Some("rclone mount X: Y:".into()),
            ..MatchSpec::default()
        };
        let result = resolve(&spec, None, &snapshot, 0);
        assert_eq!(result.canonical.as_ref().unwrap().pid, 100);
        assert!(result.orphans.is_empty());
        assert!(result.ambiguity("sync").is_none());
    }

    #[test]
    fn excluded_pid_is_never_matched() {
        let snapshot = vec![proc(50, None, "control", &["control", "run"], 1)];
        let result = resolve(&argv_spec(&["control", "run"]), None, &snapshot, 50);
        assert!(!result.is_running());
    }

    #[test]
    fn parent_cycles_do_not_hang() {
        let snapshot = vec![
            proc(1, Some(2), "a", &["a"], 1),
            proc(2, Some(1), "a", &["a"], 2),
        ];
        let result = resolve(&argv_spec(&["a"]), None, &snapshot, 0);
        // Each has the other as a matched ancestor: neither is an independent root.
        assert!(result.canonical.is_none());
        assert!(result.orphans.is_empty());
    }
}
