use minijinja::Environment;
use serde::Serialize;

use crate::error::Result;

pub const KEYWORD_PROMPT_TEMPLATE: &str = r#"
Your task is to convert the following question into 3 keywords that can be used to find relevant medical research papers on PubMed.
Here is an example:
question: "What are the latest treatments for major depressive disorder?"
keywords:
Antidepressive Agents
Depressive Disorder, Major
Treatment-Resistant depression
---
question: {{ question }}
keywords:
"#;

pub const ANSWER_PROMPT_TEMPLATE: &str = r#"
Answer the question truthfully based on the given documents.
If the documents don't contain an answer, use your existing knowledge base.

q: {{ question }}
Articles:
{% for article in articles %}
  {{ article.content }}
  keywords: {{ article.meta['keywords'] }}
  title: {{ article.meta['title'] }}
{% endfor %}
"#;

/// Renders a single Jinja template against a serializable set of variables.
pub struct PromptBuilder {
    env: Environment<'static>,
    name: &'static str,
}

impl PromptBuilder {
    pub fn new(name: &'static str, template: &'static str) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(name, template)?;
        Ok(Self { env, name })
    }

    pub fn keyword_prompt() -> Result<Self> {
        Self::new("keyword_prompt", KEYWORD_PROMPT_TEMPLATE)
    }

    pub fn answer_prompt() -> Result<Self> {
        Self::new("answer_prompt", ANSWER_PROMPT_TEMPLATE)
    }

    pub fn render<S: Serialize>(&self, variables: S) -> Result<String> {
        let template = self.env.get_template(self.name)?;
        Ok(template.render(variables)?)
    }
}
