// src/exec/template.rs

//! `${{ params.<key> }}` / `${{ secrets.<key> }}` command templates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::PipelineFile;
use crate::errors::DefinitionError;
use crate::exec::secrets::SecretBag;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*(params|secrets)\.([A-Za-z0-9_.-]+)\s*\}\}")
});

fn placeholder_regex() -> Result<&'static Regex, DefinitionError> {
    PLACEHOLDER
        .as_ref()
        .map_err(|e| DefinitionError::Invalid(format!("template pattern: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Params,
    Secrets,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Params => f.write_str("params"),
            Scope::Secrets => f.write_str("secrets"),
        }
    }
}

/// Every placeholder referenced by `cmd`, in order of appearance.
pub fn placeholders(cmd: &str) -> Result<Vec<(Scope, String)>, DefinitionError> {
    let re = placeholder_regex()?;
    Ok(re
        .captures_iter(cmd)
        .map(|caps| (scope_of(&caps), caps[2].to_string()))
        .collect())
}

fn scope_of(caps: &Captures<'_>) -> Scope {
    if &caps[1] == "secrets" {
        Scope::Secrets
    } else {
        Scope::Params
    }
}

/// Check that every placeholder of every task resolves.
pub fn validate_templates(
    pipeline: &PipelineFile,
    params: &BTreeMap<String, String>,
    secrets: &SecretBag,
) -> Result<(), DefinitionError> {
    for (name, task) in pipeline.tasks() {
        for (scope, key) in placeholders(&task.cmd)? {
            let known = match scope {
                Scope::Params => params.contains_key(&key),
                Scope::Secrets => secrets.contains(&key),
            };
            if !known {
                return Err(DefinitionError::UnknownTemplateKey {
                    task: name.clone(),
                    scope: scope.to_string(),
                    key,
                });
            }
        }
    }
    Ok(())
}

/// Substitute placeholders in `cmd`.
pub fn expand(
    task: &str,
    cmd: &str,
    params: &BTreeMap<String, String>,
    secrets: &SecretBag,
) -> Result<String, DefinitionError> {
    let re = placeholder_regex()?;
    let mut missing = None;

    let expanded = re.replace_all(cmd, |caps: &Captures<'_>| {
        let scope = scope_of(caps);
        let key = &caps[2];
        let value = match scope {
            Scope::Params => params.get(key).map(String::as_str),
            Scope::Secrets => secrets.get(key),
        };
        match value {
            Some(v) => v.to_string(),
            None => {
                missing.get_or_insert((scope, key.to_string()));
                String::new()
            }
        }
    });

    match missing {
        Some((scope, key)) => Err(DefinitionError::UnknownTemplateKey {
            task: task.to_string(),
            scope: scope.to_string(),
            key,
        }),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BTreeMap<String, String> {
        BTreeMap::from([("image".to_string(), "app:1.0".to_string())])
    }

    #[test]
    fn expands_params_and_secrets() {
        let secrets: SecretBag = [("token", "s3cr3t")].into_iter().collect();
        let out = expand(
            "push",
            "push ${{ params.image }} --token=${{secrets.token}}",
            &params(),
            &secrets,
        )
        .unwrap();
        assert_eq!(out, "push app:1.0 --token=s3cr3t");
    }

    #[test]
    fn unknown_key_is_a_definition_error() {
        let err = expand("push", "echo ${{ params.tag }}", &params(), &SecretBag::new()).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnknownTemplateKey {
                task: "push".into(),
                scope: "params".into(),
                key: "tag".into(),
            }
        );
    }

    #[test]
    fn plain_shell_variables_are_left_alone() {
        let out = expand("t", "echo ${HOME} $PIPEDAG_INPUTS", &params(), &SecretBag::new()).unwrap();
        assert_eq!(out, "echo ${HOME} $PIPEDAG_INPUTS");
    }

    #[test]
    fn lists_placeholders_in_order() {
        let found = placeholders("${{ secrets.a }} ${{ params.b }}").unwrap();
        assert_eq!(
            found,
            vec![(Scope::Secrets, "a".to_string()), (Scope::Params, "b".to_string())]
        );
    }
}
