//! Berth CLI - Main entry point

use anyhow::Context;
use berth_core::scaffold::ProjectScaffolder;
use berth_foundation::{BerthConfig, JsonProjectStore, Project, ProjectStore, Tool};
use berth_task::{ContainerManager, SidecarRunner, StartedContainer, Task};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Berth - containerized agent-task orchestrator
#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the worker image
    Build {
        /// Image tag (defaults to the configured worker image)
        #[arg(long)]
        tag: Option<String>,

        /// Rebuild without the layer cache
        #[arg(long)]
        no_cache: bool,

        /// Stream build output
        #[arg(short, long)]
        verbose: bool,
    },
    /// Start a worker container for a task
    Run {
        /// Command the agent executes
        #[arg(short, long)]
        command: String,

        /// Task id (generated when omitted)
        #[arg(short, long)]
        task_id: Option<String>,

        /// Worker tool
        #[arg(long, default_value = "code")]
        tool: String,

        /// Project to check out (repeatable)
        #[arg(short, long = "project")]
        projects: Vec<String>,

        /// Run as the privileged core task (all known projects)
        #[arg(long)]
        core: bool,
    },
    /// List running workers
    Ps,
    /// Stop a task's worker and release its workspaces
    Stop {
        /// Task id
        task_id: String,
    },
    /// Follow a worker's container logs
    Logs {
        /// Task id
        task_id: String,
    },
    /// Stop and remove every worker container
    Cleanup,
    /// Scaffold a new generated project
    Scaffold {
        /// Project id (store key and directory name)
        project_id: String,

        /// Template type
        #[arg(long, default_value = "default")]
        project_type: String,

        /// One-line description
        #[arg(long)]
        description: Option<String>,

        /// Longer description
        #[arg(long)]
        details: Option<String>,
    },
    /// Run sidecar containers for a task's project workspaces
    Sidecars {
        /// Task id
        task_id: String,

        /// Projects to consider
        projects: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BerthConfig::load().context("Failed to load configuration")?;
    let store: Arc<dyn ProjectStore> =
        Arc::new(JsonProjectStore::global().context("Failed to open project store")?);

    match args.command {
        Command::Build {
            tag,
            no_cache,
            verbose,
        } => {
            let manager = ContainerManager::new(config, store);
            if manager.build_image(tag.as_deref(), no_cache, verbose).await {
                println!("Image built");
                Ok(())
            } else {
                anyhow::bail!("Image build failed");
            }
        }

        Command::Run {
            command,
            task_id,
            tool,
            projects,
            core,
        } => {
            let tool: Tool = tool
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let task_id = task_id.unwrap_or_else(generated_task_id);

            let mut task = Task::new(&task_id, command, tool).with_projects(projects);
            if core {
                task = task.with_core_task_id(&task_id);
            }

            let manager = ContainerManager::new(config, store);
            match manager.start_container(&mut task).await? {
                StartedContainer::Detached { container_id } => {
                    println!("Task {} started in container {}", task_id, container_id);
                }
                StartedContainer::Attached { handle } => {
                    println!("Task {} started attached ({})", task_id, handle);
                }
            }
            Ok(())
        }

        Command::Ps => {
            let manager = ContainerManager::new(config, store);
            let workers = manager.list_running().await;
            if workers.is_empty() {
                println!("No running workers");
            } else {
                for worker in workers {
                    println!(
                        "{}\t{}\t{}",
                        worker.task_id,
                        &worker.container_id[..12.min(worker.container_id.len())],
                        worker.command
                    );
                }
            }
            Ok(())
        }

        Command::Stop { task_id } => {
            let manager = ContainerManager::new(config, store);
            manager.stop_container(&task_id).await;
            println!("Task {} stopped", task_id);
            Ok(())
        }

        Command::Logs { task_id } => {
            let manager = ContainerManager::new(config, store);
            let monitor = manager
                .monitor_logs(&task_id, |line| println!("{}", line))
                .context("Failed to attach to container logs")?;

            tokio::signal::ctrl_c().await?;
            monitor.stop().await;
            Ok(())
        }

        Command::Cleanup => {
            let manager = ContainerManager::new(config, store);
            manager.cleanup_all().await;
            println!("Cleanup complete");
            Ok(())
        }

        Command::Scaffold {
            project_id,
            project_type,
            description,
            details,
        } => {
            // Register the project record first if it is new
            if store.get_project(&project_id).await?.is_none() {
                let mut project = Project::generated(&project_id, &project_type);
                project.simple_description = description;
                project.detailed_description = details;
                store.update_project(&project).await?;
            }

            let scaffolder = ProjectScaffolder::new(config.paths.clone(), store);
            scaffolder
                .scaffold(&project_id)
                .await
                .context("Scaffolding failed")?;
            println!("Project {} scaffolded", project_id);
            Ok(())
        }

        Command::Sidecars { task_id, projects } => {
            let manager = ContainerManager::new(config.clone(), store);
            let runner = SidecarRunner::new(config.paths.clone(), manager.runtime().clone());
            let ports = runner.run_project_containers(&task_id, &projects).await;
            if ports.is_empty() {
                println!("No sidecars started");
            } else {
                for (project_id, port) in ports {
                    println!("{}\t127.0.0.1:{}", project_id, port);
                }
            }
            Ok(())
        }
    }
}

/// Short generated task id in the `AI-<hex>` convention
fn generated_task_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("AI-{}", &id[..8])
}
