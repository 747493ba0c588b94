use crate::RuntimeError;
use director_schema::{Script, ScriptKind};

/// Where a script runs, as understood by `appjail cmd`.
fn environment_token(kind: ScriptKind) -> &'static str {
    match kind {
        ScriptKind::Jexec => "jexec",
        ScriptKind::Local => "local",
        ScriptKind::Chroot => "chroot",
    }
}

/// Arguments for `appjail cmd` that run `script` against `jail`.
///
/// The shell string is split into words and the script text is passed as its
/// final argument, so `/bin/sh -c` becomes `... -- /bin/sh -c TEXT`.
pub fn script_args(jail: &str, script: &Script) -> Result<Vec<String>, RuntimeError> {
    let shell = split_shell(&script.shell)?;
    if shell.is_empty() {
        return Err(RuntimeError::InvalidShell(script.shell.clone()));
    }
    let mut args = vec![
        "cmd".to_owned(),
        environment_token(script.kind).to_owned(),
        jail.to_owned(),
        "--".to_owned(),
    ];
    args.extend(shell);
    args.push(script.text.clone());
    Ok(args)
}

/// Split a shell command line into words with POSIX-style quoting.
pub fn split_shell(input: &str) -> Result<Vec<String>, RuntimeError> {
    shlex::split(input).ok_or_else(|| RuntimeError::InvalidShell(input.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(kind: ScriptKind, shell: &str, text: &str) -> Script {
        Script {
            shell: shell.to_owned(),
            kind,
            text: text.to_owned(),
        }
    }

    #[test]
    fn default_shell_is_split() {
        assert_eq!(split_shell("/bin/sh -c").unwrap(), vec!["/bin/sh", "-c"]);
    }

    #[test]
    fn quotes_group_words() {
        assert_eq!(
            split_shell(r#"env 'A B' "C \"D\"" E\ F"#).unwrap(),
            vec!["env", "A B", "C \"D\"", "E F"]
        );
        assert_eq!(split_shell("''").unwrap(), vec![""]);
        assert!(split_shell("").unwrap().is_empty());
    }

    #[test]
    fn unbalanced_quotes_fail() {
        assert!(split_shell("sh -c 'oops").is_err());
        assert!(split_shell("sh \"oops").is_err());
        assert!(split_shell("sh -c\\").is_err());
    }

    #[test]
    fn each_environment_maps_to_cmd_type() {
        for (kind, token) in [
            (ScriptKind::Jexec, "jexec"),
            (ScriptKind::Local, "local"),
            (ScriptKind::Chroot, "chroot"),
        ] {
            let args = script_args("web", &script(kind, "/bin/sh -c", "echo ${HOME}")).unwrap();
            assert_eq!(
                args,
                vec!["cmd", token, "web", "--", "/bin/sh", "-c", "echo ${HOME}"]
            );
        }
    }

    #[test]
    fn blank_shell_is_rejected() {
        assert!(script_args("web", &script(ScriptKind::Jexec, "   ", "true")).is_err());
    }
}
