use std::path::Path;
use tera::{Context, Tera};

use crate::renderer::RenderedPage;

/// Name the page template is registered under. A theme directory can
/// provide its own file with this name.
pub const PAGE_TEMPLATE: &str = "page.md";

const BUILTIN_PAGE: &str = "---\n{{ frontmatter }}---\n\n{{ body }}\n{{ toc }}";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template error: {0}")]
    Tera(#[from] tera::Error),
    #[error("could not serialize frontmatter: {0}")]
    Frontmatter(#[from] serde_yaml::Error),
}

/// Assembles rendered pages into their final Markdown text.
pub struct PageTemplate {
    tera: Tera,
}

impl PageTemplate {
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::new(None)
    }

    /// Loads `*.md` templates from `theme_dir` when given. The built-in page
    /// template is used unless the theme defines `page.md`.
    pub fn new(theme_dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut tera = match theme_dir {
            Some(dir) => Tera::new(&format!("{}/**/*.md", dir.display()))?,
            None => Tera::default(),
        };
        if !tera.get_template_names().any(|name| name == PAGE_TEMPLATE) {
            tera.add_raw_template(PAGE_TEMPLATE, BUILTIN_PAGE)?;
        }
        // Page bodies are already escaped Markdown.
        tera.autoescape_on(vec![]);
        Ok(Self { tera })
    }

    pub fn render(&self, page: &RenderedPage) -> Result<String, TemplateError> {
        let mut context = Context::new();
        context.insert("frontmatter", &serde_yaml::to_string(&page.frontmatter)?);
        context.insert("body", &page.body_markdown());
        context.insert("toc", &page.toc_markdown());
        context.insert("toc_entries", &page.toc);
        context.insert("id", page.id.as_str());
        context.insert("title", &page.frontmatter.title);
        context.insert("warning_count", &page.warnings.len());
        Ok(self.tera.render(PAGE_TEMPLATE, &context)?)
    }
}
