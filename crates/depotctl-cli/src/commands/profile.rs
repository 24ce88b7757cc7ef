use anyhow::Result;
use clap::Args;
use colored::Colorize;
use depotctl_core::operation::OperationKind;
use depotctl_core::profile::Profile;
use std::path::PathBuf;

use super::AppContext;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Unique profile name
    pub name: String,
    /// upload or download
    #[arg(long)]
    pub kind: OperationKind,
    #[arg(long)]
    pub app: u32,
    #[arg(long)]
    pub depot: u32,
    /// Content root (upload) or destination directory (download)
    #[arg(long)]
    pub path: PathBuf,
    /// Branch to set the build live on (upload only)
    #[arg(long)]
    pub channel: Option<String>,
    #[arg(long, default_value = "")]
    pub description: String,
    /// Manifest GID to fetch (download only)
    #[arg(long)]
    pub manifest: Option<String>,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    pub name: String,
    #[arg(long)]
    pub app: Option<u32>,
    #[arg(long)]
    pub depot: Option<u32>,
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long, conflicts_with = "clear_channel")]
    pub channel: Option<String>,
    #[arg(long)]
    pub clear_channel: bool,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, conflicts_with = "clear_manifest")]
    pub manifest: Option<String>,
    #[arg(long)]
    pub clear_manifest: bool,
}

pub async fn list(ctx: &AppContext) -> Result<()> {
    let profiles = ctx.profiles.list().await?;
    if profiles.is_empty() {
        println!("No profiles yet. Add one with `depotctl profile add`.");
        return Ok(());
    }
    for profile in profiles {
        let last = profile
            .last_run
            .as_ref()
            .map(|run| {
                format!(
                    "{} {}",
                    run.outcome,
                    run.finished_at.format("%Y-%m-%d %H:%M")
                )
            })
            .unwrap_or_else(|| "never run".to_string());
        println!(
            "{:<20} {:<8} app {:<8} depot {:<8} {}",
            profile.name.bold(),
            profile.kind.to_string(),
            profile.app_id,
            profile.depot_id,
            last.dimmed()
        );
    }
    Ok(())
}

pub async fn show(ctx: &AppContext, name: &str) -> Result<()> {
    let profile = ctx.profiles.get(name).await?;
    print_profile(&profile);
    Ok(())
}

pub async fn add(ctx: &AppContext, args: AddArgs) -> Result<()> {
    let mut profile = match args.kind {
        OperationKind::Upload => Profile::upload(args.name, args.app, args.depot, args.path),
        OperationKind::Download => Profile::download(args.name, args.app, args.depot, args.path),
    }
    .with_description(args.description);
    profile.channel = args.channel;
    profile.manifest_id = args.manifest;

    if !profile.path.is_dir() {
        println!(
            "{}",
            format!(
                "note: {} does not exist yet; it must exist before the profile runs",
                profile.path.display()
            )
            .yellow()
        );
    }
    let profile = ctx.profiles.create(profile).await?;
    println!("{} Created profile '{}'", "✓".green(), profile.name);
    Ok(())
}

pub async fn edit(ctx: &AppContext, args: EditArgs) -> Result<()> {
    let profile = ctx
        .profiles
        .edit(&args.name, |p| {
            if let Some(app) = args.app {
                p.app_id = app;
            }
            if let Some(depot) = args.depot {
                p.depot_id = depot;
            }
            if let Some(path) = args.path {
                p.path = path;
            }
            if args.clear_channel {
                p.channel = None;
            } else if let Some(channel) = args.channel {
                p.channel = Some(channel);
            }
            if let Some(description) = args.description {
                p.description = description;
            }
            if args.clear_manifest {
                p.manifest_id = None;
            } else if let Some(manifest) = args.manifest {
                p.manifest_id = Some(manifest);
            }
        })
        .await?;
    println!("{} Updated profile '{}'", "✓".green(), profile.name);
    print_profile(&profile);
    Ok(())
}

pub async fn remove(ctx: &AppContext, name: &str) -> Result<()> {
    ctx.profiles.delete(name).await?;
    println!("{} Removed profile '{}'", "✓".green(), name);
    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("{}", profile.name.bold());
    println!("  kind:        {}", profile.kind);
    println!("  app:         {}", profile.app_id);
    println!("  depot:       {}", profile.depot_id);
    let path_label = match profile.kind {
        OperationKind::Upload => "content:    ",
        OperationKind::Download => "destination:",
    };
    println!("  {} {}", path_label, profile.path.display());
    if let Some(channel) = &profile.channel {
        println!("  channel:     {}", channel);
    }
    if let Some(manifest) = &profile.manifest_id {
        println!("  manifest:    {}", manifest);
    }
    if !profile.description.is_empty() {
        println!("  description: {}", profile.description);
    }
    match &profile.last_run {
        Some(run) => {
            let build = run
                .build_id
                .map(|id| format!(" (build {})", id))
                .unwrap_or_default();
            println!(
                "  last run:    {} at {}{}",
                run.outcome,
                run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                build
            );
        }
        None => println!("  last run:    never"),
    }
}
