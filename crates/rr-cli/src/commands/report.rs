//! Report command for generating usage reports.
//!
//! This module implements `rr report` with period keywords (day, week,
//! month and their "last" variants) or an explicit `--from/--to` range, and
//! output formats (human-readable text, CSV, JSON).

use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Args, ValueEnum};
use rr_core::{ReportBody, ReportRecord, ReportScope, UsageReport, build_report};
use rr_db::Database;
use serde::Serialize;

use crate::Config;
use crate::commands::util::{open_database, parse_datetime};

/// Report period keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Day,
    LastDay,
    Week,
    LastWeek,
    Month,
    LastMonth,
}

/// Which products a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scope {
    /// Every product.
    All,
    /// Products of a single category.
    Category,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Csv,
    Json,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Report period.
    #[arg(value_enum, default_value_t = Period::Week)]
    pub period: Period,

    /// Start of a custom range (ISO 8601 or e.g. "2 days ago"). Overrides the period.
    #[arg(long, requires = "to")]
    pub from: Option<String>,

    /// End of a custom range, exclusive.
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    /// Report over all products or a single category.
    #[arg(long, value_enum, default_value_t = Scope::All)]
    pub scope: Scope,

    /// Category for `--scope category`. Defaults to `default_category` from config.
    #[arg(long)]
    pub category: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Half-open time range a report covers, with its display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
}

/// Computed report data.
#[derive(Debug)]
pub struct ReportData {
    pub generated_at: DateTime<Utc>,
    pub range: ReportRange,
    pub timezone: String,
    pub scope: ReportScope,
    pub report: UsageReport,
}

// ========== Period Date Calculation ==========

/// Converts a local date at midnight to UTC.
/// Handles DST ambiguity by picking the earlier time.
fn local_midnight_to_utc(local_date: NaiveDate) -> DateTime<Utc> {
    let midnight = local_date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        // Single or ambiguous (DST fall-back): use the earlier time
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            // DST spring-forward gap at midnight: 1am local exists
            let one_am = midnight + chrono::Duration::hours(1);
            Local
                .from_local_datetime(&one_am)
                .earliest()
                .map_or_else(|| Utc.from_utc_datetime(&midnight), |dt| dt.with_timezone(&Utc))
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(i64::from(date.day0()))
}

/// Calculates local date boundaries for a period as a half-open interval.
fn period_dates(period: Period, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = today - chrono::Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let month = first_of_month(today);
    match period {
        Period::Day => (today, today + chrono::Duration::days(1)),
        Period::LastDay => (today - chrono::Duration::days(1), today),
        Period::Week => (monday, monday + chrono::Duration::days(7)),
        Period::LastWeek => (monday - chrono::Duration::days(7), monday),
        Period::Month => (month, first_of_month(month + chrono::Duration::days(31))),
        Period::LastMonth => (first_of_month(month - chrono::Duration::days(1)), month),
    }
}

/// Get boundaries for a given period, using the provided date as reference.
pub fn get_period_boundaries(period: Period, today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let (start, end) = period_dates(period, today);
    (local_midnight_to_utc(start), local_midnight_to_utc(end))
}

/// Formats the period description for the report header.
fn describe_period(period: Period, today: NaiveDate) -> String {
    let (start, _) = period_dates(period, today);
    match period {
        // "Week of Mar 3, 2025"
        Period::Week | Period::LastWeek => format!("Week of {}", start.format("%b %-d, %Y")),
        // "Tuesday, Mar 4, 2025"
        Period::Day | Period::LastDay => start.format("%A, %b %-d, %Y").to_string(),
        // "March 2025"
        Period::Month | Period::LastMonth => start.format("%B %Y").to_string(),
    }
}

/// Resolves the report range from the arguments.
pub fn resolve_range(args: &ReportArgs, today: NaiveDate) -> Result<ReportRange> {
    if let (Some(from), Some(to)) = (&args.from, &args.to) {
        let start = parse_datetime(from).context("invalid --from")?;
        let end = parse_datetime(to).context("invalid --to")?;
        if end <= start {
            anyhow::bail!("--to must be after --from");
        }
        let label = format!(
            "{} to {}",
            start.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            end.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
        return Ok(ReportRange { start, end, label });
    }

    let (start, end) = get_period_boundaries(args.period, today);
    Ok(ReportRange {
        start,
        end,
        label: describe_period(args.period, today),
    })
}

// ========== Report Generation ==========

/// Generates report data from the database.
pub fn generate_report_data<Tz: TimeZone>(
    db: &Database,
    range: ReportRange,
    scope: ReportScope,
    tz: &Tz,
    generated_at: DateTime<Utc>,
) -> Result<ReportData> {
    let events = db.list_events_in_range(range.start, range.end, scope.category())?;
    let report = build_report(&events, tz);
    if report.dropped_events > 0 {
        tracing::warn!(
            dropped = report.dropped_events,
            "some events reference unknown products or machines"
        );
    }

    let timezone = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());

    Ok(ReportData {
        generated_at,
        range,
        timezone,
        scope,
        report,
    })
}

fn describe_scope(scope: &ReportScope) -> String {
    match scope {
        ReportScope::All => "all products".to_string(),
        ReportScope::Category(category) => format!("category {category}"),
    }
}

// ========== Text Output ==========

const TABLE_WIDTH: usize = 68;
const PRODUCT_WIDTH: usize = 20;

/// Truncates a cell to `width` characters, ending in "..." if cut.
fn fit_cell(content: &str, width: usize) -> String {
    if content.chars().count() <= width {
        return content.to_string();
    }
    let kept: String = content.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn write_table_row(output: &mut String, cells: [&str; 7]) {
    let [product, machine, date, on, off, minutes, quantity] = cells;
    let product = fit_cell(product, PRODUCT_WIDTH);
    writeln!(
        output,
        "{product:<20} {machine:<7} {date:<10} {on:<5} {off:<5} {minutes:>7} {quantity:>8}"
    )
    .unwrap();
}

/// Formats the human-readable report output.
pub fn format_report(data: &ReportData) -> String {
    let mut output = String::new();

    writeln!(output, "USAGE REPORT: {}", data.range.label).unwrap();
    writeln!(output, "Scope: {}", describe_scope(&data.scope)).unwrap();
    writeln!(output).unwrap();

    if let ReportBody::Placeholder(message) = &data.report.body {
        writeln!(output, "{message}").unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Hint: Run 'rr status' to check what has been imported.").unwrap();
        return output;
    }

    if matches!(data.report.body, ReportBody::Fallback(_)) {
        writeln!(
            output,
            "No runs could be reconciled; listing events individually."
        )
        .unwrap();
        writeln!(output).unwrap();
    }

    write_table_row(
        &mut output,
        ["PRODUCT", "MACHINE", "DATE", "ON", "OFF", "MINUTES", "QTY"],
    );
    writeln!(output, "{}", "─".repeat(TABLE_WIDTH)).unwrap();
    for record in data.report.records() {
        let quantity = record.quantity.map(|q| q.to_string()).unwrap_or_default();
        write_table_row(
            &mut output,
            [
                &record.product,
                &record.machine,
                &record.date,
                &record.on_time,
                &record.off_time,
                &record.total_minutes,
                &quantity,
            ],
        );
    }

    writeln!(output).unwrap();
    writeln!(output, "SUMMARY").unwrap();
    writeln!(output, "───────").unwrap();
    writeln!(output, "Rows:            {}", data.report.body.row_count()).unwrap();
    writeln!(output, "Total quantity:  {}", data.report.total_quantity).unwrap();
    if data.report.dropped_events > 0 {
        writeln!(
            output,
            "Skipped events:  {} (unknown product or machine)",
            data.report.dropped_events
        )
        .unwrap();
    }

    output
}

// ========== CSV Output ==========

/// Writes the report rows as CSV followed by a `TOTAL` record.
pub fn write_csv<W: Write>(data: &ReportData, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in data.report.records() {
        csv.serialize(record)?;
    }
    let total = data.report.total_quantity.to_string();
    csv.write_record(["TOTAL", "", "", "", "", "", total.as_str()])?;
    csv.flush()?;
    Ok(())
}

// ========== JSON Output ==========

/// JSON report structure.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub generated_at: String,
    pub timezone: String,
    pub period: JsonPeriod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub kind: JsonBodyKind,
    pub rows: Vec<ReportRecord>,
    pub totals: JsonTotals,
}

#[derive(Debug, Serialize)]
pub struct JsonPeriod {
    pub start: String,
    pub end: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonBodyKind {
    Matched,
    Fallback,
    Placeholder,
}

#[derive(Debug, Serialize)]
pub struct JsonTotals {
    pub quantity: u64,
    pub rows: usize,
    pub events: usize,
    pub dropped_events: usize,
}

/// Formats report data as JSON.
pub fn format_report_json(data: &ReportData) -> Result<String> {
    let kind = match data.report.body {
        ReportBody::Matched(_) => JsonBodyKind::Matched,
        ReportBody::Fallback(_) => JsonBodyKind::Fallback,
        ReportBody::Placeholder(_) => JsonBodyKind::Placeholder,
    };

    let report = JsonReport {
        generated_at: data.generated_at.to_rfc3339(),
        timezone: data.timezone.clone(),
        period: JsonPeriod {
            start: data.range.start.to_rfc3339(),
            end: data.range.end.to_rfc3339(),
            label: data.range.label.clone(),
        },
        category: data.scope.category().map(str::to_string),
        kind,
        rows: data.report.records(),
        totals: JsonTotals {
            quantity: data.report.total_quantity,
            rows: data.report.body.row_count(),
            events: data.report.event_count,
            dropped_events: data.report.dropped_events,
        },
    };

    Ok(serde_json::to_string_pretty(&report)?)
}

/// Renders report data in the requested format.
pub fn render(data: &ReportData, format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Text => Ok(format_report(data).into_bytes()),
        OutputFormat::Csv => {
            let mut buf = Vec::new();
            write_csv(data, &mut buf)?;
            Ok(buf)
        }
        OutputFormat::Json => {
            let mut json = format_report_json(data)?;
            json.push('\n');
            Ok(json.into_bytes())
        }
    }
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run(args: &ReportArgs, config: &Config) -> Result<()> {
    let category = args
        .category
        .as_deref()
        .or(config.default_category.as_deref());
    let scope = ReportScope::resolve(args.scope == Scope::Category, category)?;
    let range = resolve_range(args, Local::now().date_naive())?;

    let db = open_database(config)?;
    let data = generate_report_data(&db, range, scope, &Local, Utc::now())?;
    let rendered = render(&data, args.format)?;

    if let Some(path) = &args.output {
        std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("Report written to {}", path.display());
    } else {
        std::io::stdout().lock().write_all(&rendered)?;
    }

    Ok(())
}
