//! Terminal prompts for missing or rejected credentials

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use crate::credentials::CredentialStore;
use crate::crawler::{RemediationError, Remediator};
use crate::fetcher::CredentialKind;

fn io_error(e: io::Error) -> RemediationError {
    RemediationError::Input(e.to_string())
}

fn read_line<R: BufRead>(input: &mut R) -> Result<String, RemediationError> {
    let mut line = String::new();
    if input.read_line(&mut line).map_err(io_error)? == 0 {
        return Err(RemediationError::Input("input closed".to_string()));
    }
    Ok(line.trim().to_string())
}

fn confirm<R: BufRead, W: Write>(
    question: &str,
    default: bool,
    input: &mut R,
    output: &mut W,
) -> Result<bool, RemediationError> {
    let hint = if default { "Y/n" } else { "y/N" };
    write!(output, "{question} [{hint}] ").map_err(io_error)?;
    output.flush().map_err(io_error)?;

    Ok(match read_line(input)?.to_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}

fn offer_instructions<R: BufRead, W: Write>(
    kind: CredentialKind,
    input: &mut R,
    output: &mut W,
) -> Result<(), RemediationError> {
    let question = format!("Do you want to see instructions on how to get {}?", kind.env_var());
    if confirm(&question, true, input, output)? {
        writeln!(output, "\n{}\n", kind.instructions()).map_err(io_error)?;
    }
    Ok(())
}

/// Read a non-empty value for `kind`
pub fn read_value<R: BufRead, W: Write>(
    kind: CredentialKind,
    input: &mut R,
    output: &mut W,
) -> Result<String, RemediationError> {
    write!(output, "Enter {} ({}): ", kind.env_var(), kind.display_name()).map_err(io_error)?;
    output.flush().map_err(io_error)?;

    let value = read_line(input)?;
    if value.is_empty() {
        return Err(RemediationError::Invalid(format!(
            "{} cannot be empty",
            kind.env_var()
        )));
    }
    Ok(value)
}

/// Ask for a credential that was never configured
pub fn prompt_missing<R: BufRead, W: Write>(
    kind: CredentialKind,
    input: &mut R,
    output: &mut W,
) -> Result<String, RemediationError> {
    writeln!(output, "\n{} is required but not set.", kind.env_var()).map_err(io_error)?;
    offer_instructions(kind, input, output)?;
    read_value(kind, input, output)
}

/// Ask for a replacement of a rejected credential
pub fn prompt_replacement<R: BufRead, W: Write>(
    kind: CredentialKind,
    input: &mut R,
    output: &mut W,
) -> Result<String, RemediationError> {
    writeln!(
        output,
        "\nCredential error detected: the {} appears to be invalid or expired.",
        kind.display_name()
    )
    .map_err(io_error)?;

    if !confirm("Would you like to enter a new value?", true, input, output)? {
        return Err(RemediationError::Declined);
    }
    offer_instructions(kind, input, output)?;
    read_value(kind, input, output)
}

/// Run a blocking prompt against the process terminal
pub async fn on_terminal<F>(prompt: F) -> Result<String, RemediationError>
where
    F: FnOnce(&mut io::StdinLock<'static>, &mut io::Stdout) -> Result<String, RemediationError>
        + Send
        + 'static,
{
    tokio::task::spawn_blocking(move || prompt(&mut io::stdin().lock(), &mut io::stdout()))
        .await
        .map_err(|e| RemediationError::Input(e.to_string()))?
}

/// Remediator asking on the terminal and storing the answer
#[derive(Debug, Clone)]
pub struct TerminalRemediator {
    store: CredentialStore,
    interactive: bool,
}

impl TerminalRemediator {
    /// Remediator updating `store`; a non-interactive one always declines
    pub fn new(store: CredentialStore, interactive: bool) -> Self {
        Self { store, interactive }
    }
}

#[async_trait]
impl Remediator for TerminalRemediator {
    async fn remediate(&self, kind: CredentialKind) -> Result<(), RemediationError> {
        if !self.interactive {
            return Err(RemediationError::Declined);
        }
        let value = on_terminal(move |input, output| prompt_replacement(kind, input, output)).await?;
        self.store
            .replace(kind, &value)
            .map_err(|e| RemediationError::Invalid(e.to_string()))
    }
}
