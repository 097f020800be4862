use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command template: {0}")]
    UnknownTemplate(String),

    #[error("template {template} is missing required parameter {param}")]
    MissingParam { template: String, param: String },

    #[error("template {template} does not declare parameter {param}")]
    UndeclaredParam { template: String, param: String },
}

/// One pre-registered command shape. `text` contains `{name}` slots for
/// each declared parameter; nothing outside the declared set is ever
/// substituted, so callers cannot smuggle in free-form command text.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub id: String,
    pub text: String,
    pub params: Vec<String>,
}

#[derive(Default)]
pub struct CommandRegistry {
    templates: HashMap<String, CommandTemplate>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: CommandTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn render(
        &self,
        template_id: &str,
        params: &HashMap<String, String>,
    ) -> Result<String, CommandError> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| CommandError::UnknownTemplate(template_id.to_string()))?;

        for name in params.keys() {
            if !template.params.iter().any(|p| p == name) {
                return Err(CommandError::UndeclaredParam {
                    template: template.id.clone(),
                    param: name.clone(),
                });
            }
        }

        let mut command = template.text.clone();
        for name in &template.params {
            let value = params.get(name).ok_or_else(|| CommandError::MissingParam {
                template: template.id.clone(),
                param: name.clone(),
            })?;
            command = command.replace(&format!("{{{name}}}"), value);
        }
        Ok(command)
    }
}
