//! Callback injection.
//!
//! Managed commands are rewritten to run through the agent's `checkin`
//! helper, which runs the original command with the same streams, reports
//! the exit code upstream and exits with that same code:
//!
//! ```text
//! POSIX:   [K='v' ...] <helper> checkin [--config <path>] --id <uuid> --name <name> --namespace <ns> -- /bin/sh -c '<original>'
//! Windows: [set "K=v" && ...] "<helper>" checkin [--config "<path>"] --id <uuid> --name <name> --namespace <ns> -- cmd.exe /C <original>
//! ```
//!
//! The rewrite is a pure text transformation and [`CallbackInjector::unwrap`]
//! reverses it.

use cronsync_protocols::{JobManifest, SchedulerKind};
use uuid::Uuid;

const CHECKIN: &str = "checkin";
const POSIX_SHELL: [&str; 2] = ["/bin/sh", "-c"];
const WINDOWS_TAIL: &str = " -- cmd.exe /C ";

/// Quoting rules of the shell the native scheduler hands commands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlavor {
    Posix,
    Windows,
}

impl ShellFlavor {
    pub fn for_kind(kind: SchedulerKind) -> Self {
        match kind {
            SchedulerKind::Crontab => ShellFlavor::Posix,
            SchedulerKind::TaskScheduler => ShellFlavor::Windows,
        }
    }

    pub fn quote(self, word: &str) -> String {
        match self {
            ShellFlavor::Posix => quote_posix(word),
            ShellFlavor::Windows => quote_windows(word),
        }
    }
}

/// What [`CallbackInjector::unwrap`] recovers from a wrapped command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedCommand {
    pub id: Uuid,
    pub name: String,
    pub namespace: String,
    /// The command as it would run without the wrapper.
    pub original: String,
    pub env: Vec<(String, String)>,
}

/// Renders the command installed for each managed job.
#[derive(Debug, Clone)]
pub struct CallbackInjector {
    flavor: ShellFlavor,
    helper: Option<String>,
    config_path: Option<String>,
}

impl CallbackInjector {
    /// Wrap commands through `helper`.
    pub fn new(flavor: ShellFlavor, helper: impl Into<String>) -> Self {
        Self {
            flavor,
            helper: Some(helper.into()),
            config_path: None,
        }
    }

    /// Install commands as written, without check-in reporting.
    pub fn disabled(flavor: ShellFlavor) -> Self {
        Self {
            flavor,
            helper: None,
            config_path: None,
        }
    }

    /// Config file the helper should read its endpoint credentials from.
    pub fn with_config_path(mut self, path: Option<String>) -> Self {
        self.config_path = path;
        self
    }

    pub fn flavor(&self) -> ShellFlavor {
        self.flavor
    }

    pub fn is_enabled(&self) -> bool {
        self.helper.is_some()
    }

    /// `command` followed by the quoted `args`.
    pub fn original(&self, manifest: &JobManifest) -> String {
        std::iter::once(manifest.command.clone())
            .chain(manifest.args.iter().map(|a| self.flavor.quote(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The exact command text to install for `manifest`.
    pub fn render(&self, manifest: &JobManifest) -> String {
        let original = self.original(manifest);
        let env: Vec<(&str, &str)> = manifest
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        match (&self.helper, self.flavor) {
            (None, ShellFlavor::Posix) if env.is_empty() => original,
            (None, ShellFlavor::Posix) => format!(
                "{} {} {}",
                posix_env(&env),
                POSIX_SHELL.join(" "),
                quote_posix(&original)
            ),
            (None, ShellFlavor::Windows) => format!("{}{}", windows_env(&env), original),
            (Some(helper), ShellFlavor::Posix) => {
                let mut words = Vec::new();
                if !env.is_empty() {
                    words.push(posix_env(&env));
                }
                words.push(quote_posix(helper));
                words.push(self.helper_args(manifest, quote_posix));
                words.push("--".to_string());
                words.push(POSIX_SHELL.join(" "));
                words.push(quote_posix(&original));
                words.join(" ")
            }
            (Some(helper), ShellFlavor::Windows) => format!(
                "{}\"{}\" {}{}{}",
                windows_env(&env),
                helper.replace('"', ""),
                self.helper_args(manifest, quote_windows),
                WINDOWS_TAIL,
                original
            ),
        }
    }

    fn helper_args(&self, manifest: &JobManifest, quote: fn(&str) -> String) -> String {
        let mut words = vec![CHECKIN.to_string()];
        if let Some(config) = &self.config_path {
            words.push("--config".to_string());
            words.push(quote(config));
        }
        words.extend([
            "--id".to_string(),
            manifest.id.to_string(),
            "--name".to_string(),
            quote(&manifest.name),
            "--namespace".to_string(),
            quote(&manifest.namespace),
        ]);
        words.join(" ")
    }

    /// Recover the job identity and original command from a wrapped command.
    /// Returns `None` for anything not produced by [`CallbackInjector::render`]
    /// with a helper.
    pub fn unwrap(command: &str) -> Option<WrappedCommand> {
        match command.find(WINDOWS_TAIL) {
            Some(split) => unwrap_windows(&command[..split], &command[split + WINDOWS_TAIL.len()..]),
            None => unwrap_posix(command),
        }
    }
}

fn posix_env(env: &[(&str, &str)]) -> String {
    env.iter()
        .map(|(k, v)| format!("{}={}", k, quote_posix(v)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn windows_env(env: &[(&str, &str)]) -> String {
    env.iter()
        .map(|(k, v)| format!("set \"{}={}\" && ", k, v))
        .collect()
}

fn quote_posix(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

fn quote_windows(word: &str) -> String {
    if !word.is_empty() && !word.chars().any(|c| c.is_whitespace() || "\"&|<>^".contains(c)) {
        word.to_string()
    } else {
        format!("\"{}\"", word.replace('"', "\"\""))
    }
}

/// Split like `sh` does for words: single quotes, double quotes, backslashes.
fn split_posix(text: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '\'' => break,
                        c => word.push(c),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next()? {
                        '"' => break,
                        '\\' => {
                            let next = chars.next()?;
                            if !matches!(next, '"' | '\\' | '$' | '`') {
                                word.push('\\');
                            }
                            word.push(next);
                        }
                        c => word.push(c),
                    }
                }
            }
            '\\' => {
                in_word = true;
                word.push(chars.next()?);
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Some(words)
}

/// Split on whitespace outside `"..."`; `""` inside quotes is a literal quote.
fn split_windows(text: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                word.push('"');
                chars.next();
            }
            '"' => {
                in_word = true;
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_quotes {
        return None;
    }
    if in_word {
        words.push(word);
    }
    Some(words)
}

fn env_assignment(word: &str) -> Option<(String, String)> {
    let (key, value) = word.split_once('=')?;
    let mut chars = key.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| (key.to_string(), value.to_string()))
}

/// Parse `checkin [--config X] --id X --name X --namespace X`, returning the
/// identity and how many words were consumed.
fn parse_checkin(words: &[String]) -> Option<(Uuid, String, String, usize)> {
    if words.first().map(String::as_str) != Some(CHECKIN) {
        return None;
    }
    let mut id = None;
    let mut name = None;
    let mut namespace = None;
    let mut i = 1;
    while i < words.len() && words[i] != "--" {
        let value = words.get(i + 1)?;
        match words[i].as_str() {
            "--config" => {}
            "--id" => id = Uuid::parse_str(value).ok(),
            "--name" => name = Some(value.clone()),
            "--namespace" => namespace = Some(value.clone()),
            _ => return None,
        }
        i += 2;
    }
    Some((id?, name?, namespace?, i))
}

fn unwrap_posix(command: &str) -> Option<WrappedCommand> {
    let words = split_posix(command)?;
    let mut env = Vec::new();
    let mut i = 0;
    while let Some(pair) = words.get(i).and_then(|w| env_assignment(w)) {
        env.push(pair);
        i += 1;
    }
    // helper
    i += 1;
    let (id, name, namespace, used) = parse_checkin(words.get(i..)?)?;
    let rest = words.get(i + used..)?;
    match rest {
        [dashes, shell, flag, original] if dashes == "--" && shell == POSIX_SHELL[0] && flag == POSIX_SHELL[1] => {
            Some(WrappedCommand {
                id,
                name,
                namespace,
                original: original.clone(),
                env,
            })
        }
        _ => None,
    }
}

fn unwrap_windows(head: &str, original: &str) -> Option<WrappedCommand> {
    let words = split_windows(head)?;
    let mut env = Vec::new();
    let mut i = 0;
    while words.get(i).map(String::as_str) == Some("set") {
        env.push(env_assignment(words.get(i + 1)?)?);
        if words.get(i + 2).map(String::as_str) != Some("&&") {
            return None;
        }
        i += 3;
    }
    // helper
    i += 1;
    let (id, name, namespace, used) = parse_checkin(words.get(i..)?)?;
    if i + used != words.len() {
        return None;
    }
    Some(WrappedCommand {
        id,
        name,
        namespace,
        original: original.to_string(),
        env,
    })
}

#[cfg(test)]
#[path = "callback_tests.rs"]
mod tests;
