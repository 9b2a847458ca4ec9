use anyhow::Context;
use conductor_core::{config::Config, io, paths, prompt};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    for dir in [paths::UNITS_DIR, paths::ARCHIVE_DIR, paths::PROMPTS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_created = !paths::config_path(root).exists();
    let config = if config_created {
        let cfg = Config::new(&project_name);
        cfg.save(root).context("failed to write config.yaml")?;
        cfg
    } else {
        Config::load(root).context("failed to load existing config.yaml")?
    };

    let prompts = prompt::install_defaults(root, config.roles.keys().map(String::as_str))
        .context("failed to install default prompts")?;

    if json {
        return crate::output::print_json(&serde_json::json!({
            "root": root,
            "config_created": config_created,
            "prompts_written": prompts,
        }));
    }

    println!("Initialized conductor in: {}", root.display());
    let verb = if config_created { "created" } else { "exists: " };
    println!("  {verb} {}", paths::CONFIG_FILE);
    println!("  prompts: {prompts} written");
    Ok(())
}
