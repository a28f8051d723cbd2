//! `hookclaw onboard` — First-time setup.

use hookclaw_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let workspace_dir = AppConfig::default().workspace_path();
    let sessions_dir = AppConfig::sessions_dir();

    println!("🪝 HookClaw — First-Time Setup");
    println!("==============================\n");

    for (dir, label) in [
        (&config_dir, "config"),
        (&workspace_dir, "workspace"),
        (&sessions_dir, "sessions"),
    ] {
        if dir.exists() {
            println!("  {label} directory exists: {}", dir.display());
        } else {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created {label} directory: {}", dir.display());
        }
    }

    let agents_path = workspace_dir.join("AGENTS.md");
    if !agents_path.exists() {
        std::fs::write(
            &agents_path,
            concat!(
                "# Agent Instructions\n\n",
                "- Read a file before editing it\n",
                "- Prefer `rg`/`grep` over reading large files page by page\n",
                "- Never print credentials or key files\n",
            ),
        )?;
        println!("✅ Created AGENTS.md");
    }

    let user_path = workspace_dir.join("USER.md");
    if !user_path.exists() {
        std::fs::write(
            &user_path,
            concat!(
                "# User Context\n\n",
                "<!-- Add information about yourself that the agent should know -->\n",
                "- Preferred Language: (edit this)\n",
            ),
        )?;
        println!("✅ Created USER.md");
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Edit {} and add your API key", config_path.display());
        println!("   2. Run: hookclaw agent");
        println!("   3. Add PLAN.md to the workspace to customize the planner\n");
    }

    println!("🎉 Setup complete! Run `hookclaw agent` to start chatting.\n");
    Ok(())
}
