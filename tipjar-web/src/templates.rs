//! HTML templates rendered with minijinja.

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, Value};
use tipjar::core::cta::format_cents;
use tipjar::core::markdown;

const BASE_TEMPLATE: &str = include_str!("../templates/base.html");
const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");
const ERROR_TEMPLATE: &str = include_str!("../templates/error.html");

/// Template engine wrapper around minijinja.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_filter("markdown", |text: String| {
            Value::from_safe_string(markdown::render(&text))
        });
        env.add_filter("money", format_cents);
        env.add_template("base.html", BASE_TEMPLATE)
            .context("load base.html")?;
        env.add_template("index.html", INDEX_TEMPLATE)
            .context("load index.html")?;
        env.add_template("error.html", ERROR_TEMPLATE)
            .context("load error.html")?;
        Ok(Self { env })
    }

    pub fn render(&self, name: &str, ctx: Value) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("find template {name}"))?;
        template
            .render(ctx)
            .with_context(|| format!("render template {name}"))
    }
}
