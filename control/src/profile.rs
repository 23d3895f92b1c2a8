//! Applying profiles: minimal start/stop diffs over the listed apps only.

use crate::error::ProfileError;
use crate::model::{DesiredState, ManagedApp, Profile};
use crate::process::ProcessTable;
use crate::supervisor::Supervisor;

/// What applying a profile would change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfilePlan {
    /// Apps whose desired state differs, with the state to switch to.
    pub changes: Vec<(String, DesiredState)>,
    pub unchanged: Vec<String>,
    /// Listed in the profile but not in the registry.
    pub unknown: Vec<String>,
}

/// Outcome of a profile application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileReport {
    pub profile: String,
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub unchanged: Vec<String>,
    pub unknown: Vec<String>,
}

/// Diffs `profile` against the registry. Apps the profile does not list never
/// appear in the plan.
pub fn plan(apps: &[ManagedApp], profile: &Profile) -> ProfilePlan {
    let mut plan = ProfilePlan::default();
    for (name, want) in &profile.states {
        match apps.iter().find(|a| &a.name == name) {
            None => plan.unknown.push(name.clone()),
            Some(app) if app.desired_state == *want => plan.unchanged.push(name.clone()),
            Some(_) => plan.changes.push((name.clone(), *want)),
        }
    }
    plan
}

/// Applies `profile`, continuing past per-app failures and reporting them
/// together at the end.
pub async fn apply<T: ProcessTable>(
    supervisor: &mut Supervisor<T>,
    profile: &Profile,
) -> Result<ProfileReport, ProfileError> {
    let plan = plan(supervisor.apps(), profile);
    let mut report = ProfileReport {
        profile: profile.name.clone(),
        unchanged: plan.unchanged,
        unknown: plan.unknown,
        ..ProfileReport::default()
    };
    for name in &report.unknown {
        tracing::warn!(profile = %profile.name, app = %name, "profile lists an unknown app");
    }

    let mut failures = Vec::new();
    for (name, want) in plan.changes {
        let verb = if want.is_on() { "start" } else { "stop" };
        supervisor.record(&name, &format!("profile '{}': {verb}", profile.name));
        match supervisor.switch(&name, want).await {
            Ok(()) if want.is_on() => report.started.push(name),
            Ok(()) => report.stopped.push(name),
            Err(err) => {
                tracing::error!(profile = %profile.name, "{err}");
                failures.push(err);
            }
        }
    }

    tracing::info!(
        profile = %profile.name,
        started = report.started.len(),
        stopped = report.stopped.len(),
        failed = failures.len(),
        "profile applied"
    );
    if failures.is_empty() {
        Ok(report)
    } else {
        Err(ProfileError::Partial { profile: profile.name.clone(), report, failures })
    }
}

/// Finds `name` among `profiles`.
pub fn find<'a>(profiles: &'a [Profile], name: &str) -> Result<&'a Profile, ProfileError> {
    profiles
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ProfileError::UnknownProfile(name.to_string()))
}
