//! fieldops CLI — operator interface to the job routing engine.

use clap::{Parser, Subcommand};
use fieldops_rs::config::Config;
use fieldops_rs::db::close::CloseRequest;
use fieldops_rs::db::list::{JobFilter, StatusBucket};
use fieldops_rs::db::Db;
use fieldops_rs::model::billing::{BillKind, BillLine, CountUnit};
use fieldops_rs::model::job::{JobEdit, JobView, NewJob};
use fieldops_rs::model::{AssignmentId, BillId, ExceptionId, GroupId, JobId, Role, UserId};
use fieldops_rs::push::PushClient;
use fieldops_rs::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fieldops", about = "Field-service job routing engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations and check connectivity
    Migrate,
    /// Group and user administration
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// User administration
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Job operations
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Create a group
    Create { name: String },
    /// Archive a group; archived groups no longer accept transfers
    Archive { id: Uuid },
    /// Add a user to a group
    AddMember { group: Uuid, user: Uuid },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user
    Create {
        user_name: String,
        email: String,
        /// admin | inspector | group_manager | field_worker
        role: String,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Create a job in a group
    Create {
        /// Externally supplied job id, globally unique
        external_id: String,
        address: String,
        #[arg(long)]
        group: Uuid,
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: bool,
        #[arg(long)]
        further_inspection: bool,
        #[arg(long)]
        note: Vec<String>,
    },
    /// Show a job with its assignments
    Show { job: Uuid },
    /// Audit trail for a job
    History { job: Uuid },
    /// List jobs
    List {
        #[arg(long)]
        group: Option<Uuid>,
        /// Show the closed bucket instead of in-flight jobs
        #[arg(long)]
        closed: bool,
        #[arg(long)]
        search: Option<String>,
    },
    /// Transfer a job's active routing to another group
    Transfer {
        assignment: Uuid,
        group: Uuid,
        #[arg(long)]
        actor: Uuid,
    },
    /// Close a job; billing lines as name:kind:unit:measurement[:bill_id]
    Close {
        assignment: Uuid,
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        further_billing: bool,
        #[arg(long)]
        main_group: Option<Uuid>,
        #[arg(long)]
        bill: Vec<String>,
        #[arg(long)]
        note: Vec<String>,
    },
    /// Partially close a single assignment
    PartialClose {
        assignment: Uuid,
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        further_billing: bool,
        #[arg(long)]
        bill: Vec<String>,
    },
    /// Return a job for correction
    ReturnWrong {
        assignment: Uuid,
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        comment: String,
    },
    /// Flag a job as a duplicate of another job's assignment
    ReturnDuplicate {
        assignment: Uuid,
        duplicate_of: Uuid,
        #[arg(long)]
        actor: Uuid,
    },
    /// Resolve a wrong-information record, optionally correcting fields
    ResolveWrong {
        exception: Uuid,
        #[arg(long)]
        actor: Uuid,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Resolve a duplicate flag by keeping the flagged job
    ResolveDuplicate {
        exception: Uuid,
        #[arg(long)]
        actor: Uuid,
    },
    /// Confirm a duplicate: merge its external id and delete it entirely
    ConfirmDuplicate {
        original_assignment: Uuid,
        duplicate_assignment: Uuid,
        #[arg(long)]
        actor: Uuid,
    },
    /// Hard-delete a job and everything it owns
    Delete {
        job: Uuid,
        #[arg(long)]
        actor: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fieldops".to_string(),
    })?;

    let db = Db::connect(config.database_url.expose_secret())
        .await?
        .with_push(PushClient::from_config(&config));
    db.migrate().await?;

    match cli.command {
        Command::Migrate => {
            db.health_check().await?;
            println!("Migrations applied, database healthy.");
        }
        Command::Group { action } => match action {
            GroupAction::Create { name } => {
                let group = db.create_group(&name).await?;
                println!("Created group {} ({})", group.name, group.id);
            }
            GroupAction::Archive { id } => {
                db.archive_group(GroupId(id)).await?;
                println!("Archived group {id}");
            }
            GroupAction::AddMember { group, user } => {
                db.add_member(GroupId(group), UserId(user)).await?;
                println!("Added member");
            }
        },
        Command::User { action } => match action {
            UserAction::Create {
                user_name,
                email,
                role,
            } => {
                let role: Role = role.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
                let user = db.create_user(&user_name, &email, role).await?;
                println!("Created user {} ({})", user.user_name, user.id);
            }
        },
        Command::Job { action } => cmd_job(&db, action).await?,
    }

    Ok(())
}

async fn cmd_job(db: &Db, action: JobAction) -> anyhow::Result<()> {
    match action {
        JobAction::Create {
            external_id,
            address,
            group,
            actor,
            description,
            priority,
            further_inspection,
            note,
        } => {
            let mut new = NewJob::new(external_id, address)
                .priority(priority)
                .further_inspection(further_inspection);
            if let Some(description) = description {
                new = new.description(description);
            }
            for n in note {
                new = new.note(n);
            }
            let view = db.create_job(new, GroupId(group), UserId(actor)).await?;
            print_view(&view);
        }
        JobAction::Show { job } => {
            let view = db.job_view(JobId(job)).await?;
            print_view(&view);
        }
        JobAction::History { job } => {
            let entries = db.job_history(JobId(job)).await?;
            for entry in entries {
                println!(
                    "{}  {:<10}  {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action.to_string(),
                    entry.actor.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
        }
        JobAction::List {
            group,
            closed,
            search,
        } => {
            let entries = db
                .list_jobs(&JobFilter {
                    group: group.map(GroupId),
                    bucket: if closed { StatusBucket::Closed } else { StatusBucket::Open },
                    search,
                    ..Default::default()
                })
                .await?;
            if entries.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<8}  {:<12}  {:<10}  {:<6}  {:<6}  ADDRESS",
                "ID", "EXTERNAL", "STATUS", "ACTIVE", "HOME"
            );
            println!("{}", "-".repeat(80));
            for entry in &entries {
                println!(
                    "{:<8}  {:<12}  {:<10}  {:<6}  {:<6}  {}",
                    entry.assignment.id.to_string(),
                    entry.job.external_id,
                    entry.assignment.status.to_string(),
                    entry.assignment.is_active,
                    entry.assignment.is_home_group,
                    entry.job.address,
                );
            }
            println!("\n{} row(s)", entries.len());
        }
        JobAction::Transfer {
            assignment,
            group,
            actor,
        } => {
            let view = db
                .transfer(AssignmentId(assignment), GroupId(group), UserId(actor), None)
                .await?;
            print_view(&view);
        }
        JobAction::Close {
            assignment,
            actor,
            further_billing,
            main_group,
            bill,
            note,
        } => {
            let view = db
                .close(
                    AssignmentId(assignment),
                    UserId(actor),
                    CloseRequest {
                        bills: parse_bills(&bill)?,
                        notes: note,
                        further_billing,
                        home_reassign: main_group.map(GroupId),
                        ..Default::default()
                    },
                )
                .await?;
            print_view(&view);
        }
        JobAction::PartialClose {
            assignment,
            actor,
            further_billing,
            bill,
        } => {
            let view = db
                .partial_close(
                    AssignmentId(assignment),
                    UserId(actor),
                    CloseRequest {
                        bills: parse_bills(&bill)?,
                        further_billing,
                        ..Default::default()
                    },
                )
                .await?;
            print_view(&view);
        }
        JobAction::ReturnWrong {
            assignment,
            actor,
            comment,
        } => {
            let view = db
                .return_wrong_information(AssignmentId(assignment), UserId(actor), &comment)
                .await?;
            print_view(&view);
        }
        JobAction::ReturnDuplicate {
            assignment,
            duplicate_of,
            actor,
        } => {
            let view = db
                .return_duplicate(
                    AssignmentId(assignment),
                    AssignmentId(duplicate_of),
                    UserId(actor),
                )
                .await?;
            print_view(&view);
        }
        JobAction::ResolveWrong {
            exception,
            actor,
            address,
            description,
        } => {
            let view = db
                .resolve_wrong_information(
                    ExceptionId(exception),
                    JobEdit {
                        address,
                        description,
                        ..Default::default()
                    },
                    UserId(actor),
                )
                .await?;
            print_view(&view);
        }
        JobAction::ResolveDuplicate { exception, actor } => {
            let view = db.resolve_duplicate(ExceptionId(exception), UserId(actor)).await?;
            print_view(&view);
        }
        JobAction::ConfirmDuplicate {
            original_assignment,
            duplicate_assignment,
            actor,
        } => {
            let view = db
                .confirm_duplicate(
                    AssignmentId(original_assignment),
                    AssignmentId(duplicate_assignment),
                    UserId(actor),
                )
                .await?;
            print_view(&view);
        }
        JobAction::Delete { job, actor } => {
            db.delete_job(JobId(job), UserId(actor)).await?;
            println!("Job deleted.");
        }
    }
    Ok(())
}

/// Parse a billing line in the form name:kind:unit:measurement[:bill_id].
fn parse_bills(specs: &[String]) -> anyhow::Result<Vec<BillLine>> {
    specs
        .iter()
        .map(|spec| {
            let parts: Vec<&str> = spec.split(':').collect();
            if parts.len() < 4 {
                anyhow::bail!("invalid bill spec '{spec}', expected name:kind:unit:measurement[:bill_id]");
            }
            let kind: BillKind = parts[1].parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            let count_unit: CountUnit = parts[2].parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(BillLine {
                bill_id: parts.get(4).map(|s| Uuid::parse_str(s).map(BillId)).transpose()?,
                name: parts[0].to_string(),
                kind,
                count_unit,
                jumping_ratio: None,
                measurement: parts[3].parse()?,
                image: None,
            })
        })
        .collect()
}

fn print_view(view: &JobView) {
    let job = &view.job;
    println!("Job:        {} ({})", job.external_id, job.id);
    println!("Status:     {}", job.status.label());
    println!("Address:    {}", job.address);
    if !job.description.is_empty() {
        println!("Details:    {}", job.description);
    }
    if let Some(ref refs) = job.duplicate_reference {
        println!("Duplicates: {refs}");
    }
    if let Some(closed_at) = job.closed_at {
        println!("Closed:     {closed_at}");
    }
    println!("---");
    println!(
        "{:<8}  {:<10}  {:<6}  {:<6}  GROUP",
        "ASSIGN", "STATUS", "ACTIVE", "HOME"
    );
    for a in &view.assignments {
        println!(
            "{:<8}  {:<10}  {:<6}  {:<6}  {}",
            a.id.to_string(),
            a.status.to_string(),
            a.is_active,
            a.is_home_group,
            a.group_id.0,
        );
    }
}
