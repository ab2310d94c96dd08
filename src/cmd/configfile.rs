use anyhow::{Context, Result};
use handlebars::Handlebars;

use crate::config::Configuration;

const TEMPLATE: &str = include_str!("simple-app-server.toml");

pub fn run(conf: &Configuration) -> Result<()> {
    println!("{}", render(conf)?);
    Ok(())
}

fn render(conf: &Configuration) -> Result<String> {
    let mut reg = Handlebars::new();
    reg.register_escape_fn(|s| s.to_string().replace('"', r#"\""#));
    reg.render_template(TEMPLATE, &conf)
        .context("Render configfile")
}
