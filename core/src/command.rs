//! Resolution of the argv used to launch an adapter's upstream program.

use std::path::PathBuf;

use crate::adapter::AdapterSpec;
use crate::supervisor::SupervisorError;

/// Resolves the command line for `spec`.
///
/// Precedence: the environment override variable, then the configured
/// `command`, then the first candidate found on the search path. The
/// adapter's `startup_args` are appended in every case.
pub fn resolve_command<E, P>(
    spec: &AdapterSpec,
    lookup_env: E,
    lookup_path: P,
) -> Result<Vec<String>, SupervisorError>
where
    E: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<PathBuf>,
{
    let env_override = lookup_env(&spec.env_cmd_var).filter(|value| !value.trim().is_empty());
    let mut argv = if let Some(command) = env_override {
        split_command(spec, &command, &spec.env_cmd_var)?
    } else if let Some(command) = spec
        .command
        .as_deref()
        .filter(|value| !value.trim().is_empty())
    {
        split_command(spec, command, "adapter.command")?
    } else {
        let found = spec
            .candidates
            .iter()
            .find_map(|candidate| lookup_path(candidate.as_str()));
        match found {
            Some(path) => vec![path.to_string_lossy().into_owned()],
            None => return Err(SupervisorError::no_runtime(spec)),
        }
    };
    argv.extend(spec.startup_args.iter().cloned());
    Ok(argv)
}

/// [`resolve_command`] against the process environment and `PATH`.
pub fn resolve_command_from_env(spec: &AdapterSpec) -> Result<Vec<String>, SupervisorError> {
    resolve_command(
        spec,
        |var| std::env::var(var).ok(),
        |name| which::which(name).ok(),
    )
}

fn split_command(
    spec: &AdapterSpec,
    command: &str,
    origin: &str,
) -> Result<Vec<String>, SupervisorError> {
    match shlex::split(command) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        _ => Err(SupervisorError::configuration(format!(
            "cannot parse command line for {} from {origin}: {command:?}",
            spec.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn spec() -> AdapterSpec {
        AdapterSpec {
            candidates: vec!["hethack".to_string(), "nethack".to_string()],
            startup_args: vec!["-u".to_string(), "wizard".to_string()],
            ..AdapterSpec::custom("hethack")
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn env_override_wins_and_is_shell_split() {
        let argv = resolve_command(
            &spec(),
            |var| (var == "TOYBOX_HETHACK_CMD").then(|| "'/opt/my game/run' --tty".to_string()),
            |_| Some(PathBuf::from("/usr/bin/hethack")),
        )
        .expect("resolve");
        assert_eq!(argv, vec!["/opt/my game/run", "--tty", "-u", "wizard"]);
    }

    #[test]
    fn configured_command_beats_search_path() {
        let mut spec = spec();
        spec.command = Some("nethack -D".to_string());
        let argv = resolve_command(&spec, no_env, |_| Some(PathBuf::from("/usr/bin/hethack")))
            .expect("resolve");
        assert_eq!(argv, vec!["nethack", "-D", "-u", "wizard"]);
    }

    #[test]
    fn first_candidate_on_path_is_used() {
        let argv = resolve_command(&spec(), no_env, |name| {
            (name == "nethack").then(|| PathBuf::from("/usr/games/nethack"))
        })
        .expect("resolve");
        assert_eq!(argv, vec!["/usr/games/nethack", "-u", "wizard"]);
    }

    #[test]
    fn blank_override_falls_through() {
        let argv = resolve_command(
            &spec(),
            |_| Some("   ".to_string()),
            |name| (name == "hethack").then(|| PathBuf::from("/bin/hethack")),
        )
        .expect("resolve");
        assert_eq!(argv[0], "/bin/hethack");
    }

    #[test]
    fn failure_names_variable_and_candidates() {
        let err = resolve_command(&spec(), no_env, |_| None).expect_err("nothing to run");
        assert_matches!(err, SupervisorError::Configuration { .. });
        let message = err.to_string();
        assert!(message.contains("TOYBOX_HETHACK_CMD"), "{message}");
        assert!(message.contains("hethack, nethack"), "{message}");
    }

    #[test]
    fn unbalanced_quotes_are_a_configuration_error() {
        let err = resolve_command(
            &spec(),
            |_| Some("\"unterminated".to_string()),
            |_| None,
        )
        .expect_err("bad quoting");
        assert_matches!(err, SupervisorError::Configuration { .. });
    }
}
