use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use clocksync::{ClockSync, FingerprintDirection, ReportFilter};

#[derive(Parser)]
#[command(name = "clocksync", about = "ZKTeco clock terminal sync CLI")]
struct Cli {
    /// Database path (default: ~/.clocksync/clocksync.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// User name recorded as the job owner (default: $USER)
    #[arg(long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage clock terminals
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
    /// Manage employees
    Employee {
        #[command(subcommand)]
        action: EmployeeAction,
    },
    /// Run a synchronization job against a terminal
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },
    /// Start fingerprint enrollment on a terminal
    Enroll {
        /// Employee row id
        employee: i64,
        /// Device id
        device: i64,
        /// Finger slot (0-9): 0-4 left thumb..pinky, 5-9 right thumb..pinky
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
        finger: u8,
    },
    /// Inspect background jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Attendance reports
    Report {
        #[command(subcommand)]
        target: ReportTarget,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// Register a terminal
    Add {
        name: String,
        host: String,
        #[arg(long, default_value = "4370")]
        port: u16,
        /// Force UDP transport
        #[arg(long)]
        force_udp: bool,
        /// Skip the reachability ping before connecting
        #[arg(long)]
        omit_ping: bool,
        /// Communication password (0 = none)
        #[arg(long, default_value = "0")]
        password: u32,
    },
    /// List registered terminals
    List,
    /// Test connectivity to a terminal
    Test { id: i64 },
    /// Fetch and persist the terminal's identity block
    Info { id: i64 },
    /// Mark a terminal active
    Enable { id: i64 },
    /// Mark a terminal inactive
    Disable { id: i64 },
}

#[derive(Subcommand)]
enum EmployeeAction {
    /// Add an employee
    Add {
        /// Device user id (1-65535)
        device_user_id: u16,
        /// External employee id
        employee_id: String,
        first_name: String,
        #[arg(default_value = "")]
        last_name: String,
        #[arg(long, default_value = "")]
        department: String,
        /// 0 = normal user, 14 = device admin
        #[arg(long, default_value = "0")]
        privilege: u8,
        /// Device keypad password
        #[arg(long, default_value = "")]
        password: String,
    },
    /// List employees
    List {
        /// Include inactive employees
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum SyncTarget {
    /// Upload the active roster to a terminal, pruning obsolete users
    ToDevice {
        device: i64,
        #[arg(long)]
        no_wait: bool,
    },
    /// Download users and fingerprints from a terminal
    FromDevice {
        device: i64,
        #[arg(long)]
        no_wait: bool,
    },
    /// Download the attendance log from a terminal
    Attendance {
        device: i64,
        /// Clear the terminal's log after a successful download
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        no_wait: bool,
    },
    /// Fingerprint-only sync
    Fingerprints {
        device: i64,
        /// from (device -> db), to (db -> device), or both
        #[arg(long, default_value = "from")]
        direction: String,
        /// Restrict to one employee row id
        #[arg(long)]
        employee: Option<i64>,
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Poll one task's status
    Status {
        task_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List recent jobs
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
        /// Show all users' jobs, not just yours
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum ReportTarget {
    /// Per-employee pairs for one day
    Daily {
        /// Date (YYYY-MM-DD)
        date: String,
        #[arg(long)]
        employee: Option<i64>,
        #[arg(long)]
        device: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Seven days starting at the given date
    Weekly {
        start: String,
        #[arg(long)]
        employee: Option<i64>,
        #[arg(long)]
        device: Option<i64>,
        #[arg(long)]
        json: bool,
    },
    /// Calendar-month rollup
    Monthly {
        year: i32,
        month: u32,
        #[arg(long)]
        employee: Option<i64>,
        #[arg(long)]
        device: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => clocksync::Database::open_at(path).await?,
        None => clocksync::Database::open().await?,
    };
    let cs = ClockSync::with_configured_backend(db).await?;

    let owner = cli
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "admin".to_string());

    match cli.command {
        Commands::Device { action } => handle_device(&cs, action).await?,
        Commands::Employee { action } => handle_employee(&cs, action).await?,
        Commands::Sync { target } => handle_sync(&cs, &owner, target).await?,
        Commands::Enroll {
            employee,
            device,
            finger,
        } => {
            let replaced = cs.enroll_fingerprint(employee, device, finger).await?;
            if replaced {
                println!("Existing template in slot {finger} deleted.");
            }
            println!("Enrollment started for finger slot {finger}.");
            println!("Scan the finger at the terminal, then run:");
            println!("  clocksync sync fingerprints {device} --employee {employee} --direction from");
        }
        Commands::Job { action } => handle_job(&cs, &owner, action).await?,
        Commands::Report { target } => handle_report(&cs, target).await?,
        Commands::Config { action } => handle_config(&cs, action).await?,
    }
    Ok(())
}

async fn handle_device(cs: &ClockSync, action: DeviceAction) -> anyhow::Result<()> {
    match action {
        DeviceAction::Add {
            name,
            host,
            port,
            force_udp,
            omit_ping,
            password,
        } => {
            let device = cs
                .add_device(&name, &host, port, force_udp, omit_ping, password)
                .await?;
            println!("Added device {} ({}:{})", device.id, device.host, device.port);
        }
        DeviceAction::List => {
            let devices = cs.list_devices().await?;
            if devices.is_empty() {
                println!("No devices registered.");
            }
            for d in devices {
                let last = d
                    .last_sync
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                let active = if d.is_active { "" } else { " [inactive]" };
                println!("{} {} {}:{} (last sync: {last}){active}", d.id, d.name, d.host, d.port);
            }
        }
        DeviceAction::Test { id } => {
            let report = cs.test_device(id).await?;
            if report.ok {
                println!("OK: {} ({} ms)", report.message, report.elapsed.as_millis());
            } else {
                println!("FAILED: {} ({} ms)", report.message, report.elapsed.as_millis());
            }
        }
        DeviceAction::Info { id } => {
            let info = cs.device_info(id).await?;
            println!("Serial number:    {}", info.serial_number);
            println!("Firmware version: {}", info.firmware_version);
            println!("Platform:         {}", info.platform);
        }
        DeviceAction::Enable { id } => {
            cs.set_device_active(id, true).await?;
            println!("Device {id} enabled");
        }
        DeviceAction::Disable { id } => {
            cs.set_device_active(id, false).await?;
            println!("Device {id} disabled");
        }
    }
    Ok(())
}

async fn handle_employee(cs: &ClockSync, action: EmployeeAction) -> anyhow::Result<()> {
    match action {
        EmployeeAction::Add {
            device_user_id,
            employee_id,
            first_name,
            last_name,
            department,
            privilege,
            password,
        } => {
            let id = cs
                .add_employee(
                    device_user_id,
                    &employee_id,
                    &first_name,
                    &last_name,
                    &department,
                    privilege,
                    &password,
                )
                .await?;
            println!("Added employee {id} ({employee_id})");
        }
        EmployeeAction::List { all } => {
            let employees = cs.list_employees(!all).await?;
            if employees.is_empty() {
                println!("No employees.");
            }
            for e in employees {
                let synced = if e.synced_to_device { "synced" } else { "not synced" };
                println!(
                    "{} {} {} (uid {}, {synced})",
                    e.id,
                    e.employee_id,
                    e.full_name(),
                    e.device_user_id
                );
            }
        }
    }
    Ok(())
}

async fn handle_sync(cs: &ClockSync, owner: &str, target: SyncTarget) -> anyhow::Result<()> {
    let (task_id, wait) = match target {
        SyncTarget::ToDevice { device, no_wait } => {
            (cs.start_sync_to_device(device, owner).await?, !no_wait)
        }
        SyncTarget::FromDevice { device, no_wait } => {
            (cs.start_sync_from_device(device, owner).await?, !no_wait)
        }
        SyncTarget::Attendance {
            device,
            clear,
            no_wait,
        } => (
            cs.start_download_attendance(device, owner, clear).await?,
            !no_wait,
        ),
        SyncTarget::Fingerprints {
            device,
            direction,
            employee,
            no_wait,
        } => {
            let direction = match direction.as_str() {
                "from" => FingerprintDirection::FromDevice,
                "to" => FingerprintDirection::ToDevice,
                "both" => FingerprintDirection::Both,
                other => anyhow::bail!("Unknown direction: {other}. Use: from, to, both"),
            };
            (
                cs.start_sync_fingerprints(device, owner, direction, employee)
                    .await?,
                !no_wait,
            )
        }
    };

    println!("Task started: {task_id}");
    if wait {
        watch_task(cs, owner, &task_id).await?;
    }
    Ok(())
}

/// Poll the tracker until the job reaches a terminal state, drawing a
/// progress line the way the excluded frontend would.
async fn watch_task(cs: &ClockSync, owner: &str, task_id: &str) -> anyhow::Result<()> {
    loop {
        let view = cs.job_status(task_id, owner, true).await?;
        eprint!(
            "\r[{:>3}%] {:<60}",
            view.progress_percentage,
            truncate(&view.message, 60)
        );
        if view.is_finished {
            eprintln!();
            println!("Status: {}", view.status.as_str());
            println!("{}", view.message);
            if view.error_count > 0 {
                println!("Errors ({} total, first {} shown):", view.error_count, view.error_details.len());
                for e in &view.error_details {
                    println!("  {e}");
                }
            }
            if let Some(secs) = view.duration_seconds {
                println!("Duration: {secs:.1}s");
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

async fn handle_job(cs: &ClockSync, owner: &str, action: JobAction) -> anyhow::Result<()> {
    match action {
        JobAction::Status { task_id, json } => {
            let view = cs.job_status(&task_id, owner, true).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("Task:     {}", view.task_id);
                println!("Type:     {}", view.job_type);
                println!("Status:   {}", view.status.as_str());
                println!(
                    "Progress: {}/{} ({}%)",
                    view.progress_current, view.progress_total, view.progress_percentage
                );
                println!("Message:  {}", view.message);
                if view.error_count > 0 {
                    println!("Errors ({}):", view.error_count);
                    for e in &view.error_details {
                        println!("  {e}");
                    }
                }
            }
        }
        JobAction::List { limit, all } => {
            let owner_filter = if all { None } else { Some(owner) };
            let jobs = cs.list_jobs(owner_filter, limit).await?;
            if jobs.is_empty() {
                println!("No jobs.");
            }
            for job in jobs {
                println!(
                    "{} {} {} {}% {}",
                    job.task_id,
                    job.job_type.as_str(),
                    job.status.as_str(),
                    job.progress_percentage,
                    job.message
                );
            }
        }
    }
    Ok(())
}

async fn handle_report(cs: &ClockSync, target: ReportTarget) -> anyhow::Result<()> {
    match target {
        ReportTarget::Daily {
            date,
            employee,
            device,
            json,
        } => {
            let date = parse_date(&date)?;
            let filter = ReportFilter {
                employee_id: employee,
                device_id: device,
            };
            let rows = clocksync::report::daily_summary(cs.db(), date, filter).await?;
            print_day_rows(&rows, json)?;
        }
        ReportTarget::Weekly {
            start,
            employee,
            device,
            json,
        } => {
            let start = parse_date(&start)?;
            let filter = ReportFilter {
                employee_id: employee,
                device_id: device,
            };
            let rows = clocksync::report::weekly_summary(cs.db(), start, filter).await?;
            print_day_rows(&rows, json)?;
        }
        ReportTarget::Monthly {
            year,
            month,
            employee,
            device,
            json,
        } => {
            let filter = ReportFilter {
                employee_id: employee,
                device_id: device,
            };
            let rollups = clocksync::report::monthly_summary(cs.db(), year, month, filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rollups)?);
            } else {
                for r in rollups {
                    println!(
                        "{} days present: {}, events: {}, worked: {}h {}m",
                        r.name,
                        r.days_present,
                        r.total_events,
                        r.total_minutes / 60,
                        r.total_minutes % 60
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_day_rows(rows: &[clocksync::report::EmployeeDaySummary], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No attendance in range.");
    }
    for row in rows {
        println!("{} {}:", row.date, row.name);
        for pair in &row.summary.pairs {
            println!(
                "  {} -> {} ({}h {}m)",
                pair.entry.format("%H:%M"),
                pair.exit.format("%H:%M"),
                pair.duration_minutes / 60,
                pair.duration_minutes % 60
            );
        }
        if row.summary.unpaired > 0 {
            println!("  {} unpaired punches", row.summary.unpaired);
        }
    }
    Ok(())
}

fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date: {s}. Use YYYY-MM-DD"))
}

async fn handle_config(cs: &ClockSync, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match cs.config_get(&key).await? {
            Some(value) => println!("{value}"),
            None => println!("(not set)"),
        },
        ConfigAction::Set { key, value } => {
            cs.config_set(&key, &value).await?;
            println!("Set {key}");
        }
        ConfigAction::List => {
            let items = cs.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
