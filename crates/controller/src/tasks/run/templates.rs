use crate::crds::{Run, Workspace, HANDSHAKE_TOKEN};
use crate::tasks::types::{Error, Result};
use handlebars::Handlebars;
use serde_json::json;

const RUN_SCRIPT_TEMPLATE: &str = include_str!("../../../templates/run.sh.hbs");

/// Where the payload archive is unpacked inside the runner
pub const WORKSPACE_DIR: &str = "/workspace";

pub struct RunScriptGenerator;

impl RunScriptGenerator {
    /// Entrypoint for the runner container: unpack the payload, optionally
    /// wait for the client handshake, then exec the command.
    pub fn generate(run: &Run, workspace: &Workspace) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars
            .register_template_string("run_script", RUN_SCRIPT_TEMPLATE)
            .map_err(|e| Error::ConfigError(format!("Failed to register run script template: {e}")))?;

        let context = json!({
            "workspace_dir": WORKSPACE_DIR,
            "payload_key": shell_quote(&run.spec.config_map_key),
            "working_dir": workspace.spec.vcs.working_dir.as_deref().map(shell_quote),
            "handshake": run.spec.handshake,
            "handshake_token": HANDSHAKE_TOKEN,
            "handshake_timeout": run.spec.handshake_timeout_seconds,
            "command_line": command_line(run),
        });

        Ok(handlebars.render("run_script", &context)?)
    }
}

fn command_line(run: &Run) -> String {
    run.spec
        .command
        .program()
        .into_iter()
        .map(str::to_string)
        .chain(run.spec.args.iter().map(|arg| shell_quote(arg)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Single-quote a word for `sh`
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}
