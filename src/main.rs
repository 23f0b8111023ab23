mod ai;
mod analysis;
mod compare;
mod config;
mod db;
mod models;
mod store;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use analysis::AnalysisClient;
use compare::{ComparisonTable, Selection, MAX_COMPARE};
use config::Config;
use db::Database;
use models::{AnalysisResult, OfferInput, SavedOffer};
use store::{is_already_saved, OfferStore};

#[derive(Parser)]
#[command(name = "offerlens")]
#[command(about = "Analyze job offers, archive the assessments, and compare them side by side")]
struct Cli {
    /// Increase log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a sample offer file to fill in
    Template,

    /// Analyze an offer described in a JSON file
    Analyze {
        /// Path to the offer JSON, or '-' for stdin
        file: PathBuf,

        /// Archive the analysis after it completes
        #[arg(short, long)]
        save: bool,

        /// Print the assessment as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Do not ask the engine to search for live data
        #[arg(long)]
        no_search: bool,
    },

    /// List saved analyses, newest first
    List,

    /// Show a saved analysis
    Show {
        /// Offer ID (or unique prefix)
        id: String,

        /// Print the full markdown report
        #[arg(long)]
        markdown: bool,

        /// Print the saved record as JSON
        #[arg(long, conflicts_with = "markdown")]
        json: bool,
    },

    /// Delete a saved analysis
    Delete {
        /// Offer ID (or unique prefix)
        id: String,
    },

    /// Delete every saved analysis
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Compare up to three saved analyses side by side
    Compare {
        /// Offer IDs (or unique prefixes), in column order
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,

        /// Leave out IDs that are no longer saved instead of failing
        #[arg(long)]
        skip_missing: bool,
    },
}

/// Everything a command needs, built once in `main`.
struct AppContext {
    config: Config,
    store: OfferStore,
}

impl AppContext {
    fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.data_dir)?;
        let store = OfferStore::load(db);
        if let Some(issue) = store.load_issue() {
            eprintln!("Warning: {}", issue);
        }
        Ok(Self { config, store })
    }

    fn analysis_client(&self, model: Option<&str>, no_search: bool) -> Result<AnalysisClient> {
        let name = model.unwrap_or(&self.config.model);
        let spec = ai::resolve_model(name)?;
        info!("Using model {} ({})", spec.short_name, spec.model_id);
        let engine = ai::create_engine(&spec, self.config.max_tokens, self.config.timeout)?;
        let client = AnalysisClient::new(engine);
        if no_search || !self.config.grounding {
            Ok(client.without_grounding())
        } else {
            Ok(client)
        }
    }

    fn resolve(&self, id: &str) -> Result<&SavedOffer> {
        self.store
            .find_by_prefix(id)?
            .ok_or_else(|| anyhow!("Offer '{}' not found.", id))
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut ctx = AppContext::open(Config::load()?)?;

    match cli.command {
        Commands::Template => {
            println!("{}", serde_json::to_string_pretty(&OfferInput::sample())?);
        }

        Commands::Analyze {
            file,
            save,
            json,
            model,
            no_search,
        } => {
            let input = read_offer(&file)?;
            input.validate()?;

            let client = ctx.analysis_client(model.as_deref(), no_search)?;
            eprintln!(
                "Analyzing {} in {}, {} with {}...",
                input.job_title,
                input.city,
                input.country,
                client.model_name()
            );
            let result = client.analyze(&input)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_analysis(&input, &result);
            }

            if save {
                if is_already_saved(ctx.store.list(), &input) {
                    eprintln!("Already saved to the archive (same title, salary and city).");
                } else {
                    let saved = ctx.store.save(input, result)?;
                    eprintln!("Saved as {}.", saved.short_id());
                }
            }
        }

        Commands::List => {
            let offers = ctx.store.list();
            if offers.is_empty() {
                println!("No saved analyses.");
            } else {
                println!(
                    "{:<9} {:<11} {:<20} {:<26} {:<16} {:>18}",
                    "ID", "SAVED", "VERDICT", "TITLE", "CITY", "NET SALARY"
                );
                println!("{}", "-".repeat(105));
                for offer in offers {
                    println!(
                        "{:<9} {:<11} {:<20} {:<26} {:<16} {:>18}",
                        offer.short_id(),
                        offer.timestamp.format("%Y-%m-%d").to_string(),
                        offer.result.verdict.decision.to_string(),
                        truncate(&offer.input.job_title, 24),
                        truncate(&offer.input.city, 14),
                        compare::format_money(
                            &offer.input.currency,
                            offer.result.financial_breakdown.yearly_net_income
                        )
                    );
                }
            }
        }

        Commands::Show { id, markdown, json } => {
            let offer = ctx.resolve(&id)?;
            if markdown {
                println!("{}", offer.result.raw_markdown);
            } else if json {
                println!("{}", serde_json::to_string_pretty(offer)?);
            } else {
                println!("Offer {} (saved {})", offer.id, offer.timestamp.format("%Y-%m-%d %H:%M UTC"));
                print_analysis(&offer.input, &offer.result);
            }
        }

        Commands::Delete { id } => {
            let offer_id = ctx.resolve(&id)?.id.clone();
            if ctx.store.delete(&offer_id)? {
                println!("Deleted {}.", offer_id);
            }
        }

        Commands::Clear { yes } => {
            if !yes {
                bail!(
                    "Refusing to delete {} saved analyses without --yes",
                    ctx.store.len()
                );
            }
            let removed = ctx.store.clear()?;
            println!("Removed {} saved analyses.", removed);
        }

        Commands::Compare { ids, skip_missing } => {
            let full_ids = ids
                .iter()
                .map(|id| match ctx.store.find_by_prefix(id)? {
                    Some(offer) => Ok(offer.id.clone()),
                    None if skip_missing => Ok(id.clone()),
                    None => Err(anyhow!("Offer '{}' not found.", id)),
                })
                .collect::<Result<Vec<_>>>()?;
            let mut selection = Selection::from_ids(full_ids, MAX_COMPARE)?;
            if skip_missing {
                let requested = selection.len();
                selection.retain_existing(ctx.store.list());
                if selection.len() < requested {
                    eprintln!("Skipped {} offer(s) that are no longer saved.", requested - selection.len());
                }
                if selection.is_empty() {
                    bail!("None of the given offers are saved.");
                }
            }
            let table = compare::project(ctx.store.list(), &selection)?;
            print_comparison(&table);
        }
    }

    Ok(())
}

fn read_offer(path: &Path) -> Result<OfferInput> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read offer from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read offer file: {}", path.display()))?
    };
    let input: OfferInput = serde_json::from_str(&text).context("Offer file is not a valid offer description")?;
    Ok(input.normalized())
}

fn print_analysis(input: &OfferInput, result: &AnalysisResult) {
    let money = |amount: i64| compare::format_money(&input.currency, amount);
    let fb = &result.financial_breakdown;
    let col = &result.cost_of_living;
    let savings = &result.savings_projection;
    let scores = &result.scores;

    println!();
    match &input.company_name {
        Some(company) if !company.is_empty() => {
            println!("{} at {} ({}, {})", input.job_title, company, input.city, input.country)
        }
        _ => println!("{} ({}, {})", input.job_title, input.city, input.country),
    }
    println!("Verdict: {}  (confidence {})", result.verdict.decision, scores.decision_confidence);
    println!("{}", indent(&result.verdict.reasoning));

    println!("\n--- Financials ---");
    println!("Net income:      {} / year, {} / month", money(fb.yearly_net_income), money(fb.monthly_net_income));
    println!("Effective tax:   {:.1}%", fb.effective_tax_rate);
    println!(
        "USD equivalent:  USD {} / year (rate {})",
        compare::group_thousands(fb.usd_equivalent.yearly_net),
        fb.usd_equivalent.exchange_rate
    );
    println!("{}", indent(&fb.tax_assumptions));

    println!("\n--- Cost of living (monthly, tier {} city) ---", col.city_tier.get());
    for (label, amount) in [
        ("Rent", col.rent),
        ("Utilities", col.utilities),
        ("Food", col.food),
        ("Transport", col.transport),
        ("Healthcare", col.healthcare),
        ("Insurance", col.insurance),
        ("Misc", col.misc),
        ("Total essential", col.total_essential),
    ] {
        println!("{:<17}{}", format!("{}:", label), money(amount));
    }

    println!("\n--- Savings ---");
    println!("Disposable:      {} / month", money(savings.monthly_disposable));
    println!("Savings:         {} / month, {} / year", money(savings.monthly_savings), money(savings.annual_savings_potential));

    println!("\n--- Scores ---");
    println!("Purchasing power {}/10, career impact {}/10, work-life {}/10", scores.purchasing_power, scores.career_impact, scores.work_life_balance);
    println!("Salary fairness  {}/100", scores.salary_fairness);
    if let Some(impact) = scores.lifestyle_impact {
        println!("Lifestyle impact {}/100", impact);
    }
    let metrics = &result.global_metrics;
    println!(
        "Local norms      {} h/week, {} days paid leave, {} public holidays",
        metrics.avg_weekly_hours, metrics.min_paid_leave, metrics.public_holidays
    );

    println!("\n--- Risk: {} ---", result.risk_analysis.level);
    println!("{}", indent(&result.risk_analysis.explanation));
    if !result.warnings.is_empty() {
        println!("\nWarnings:");
        print_list(&result.warnings);
    }

    let negotiation = &result.negotiation;
    println!(
        "\n--- Negotiation ({}) ---",
        if negotiation.is_competitive { "competitive" } else { "below market" }
    );
    println!("Market range:    {}", negotiation.market_range);
    println!("Ask for:         {}", negotiation.suggested_negotiation_range);
    if !negotiation.weak_components.is_empty() {
        println!("Weak components:");
        print_list(&negotiation.weak_components);
    }
    if !negotiation.negotiation_items.is_empty() {
        println!("Negotiate on:");
        print_list(&negotiation.negotiation_items);
    }

    if let Some(current) = &result.comparison {
        println!("\n--- Versus current situation ---");
        println!("Purchasing power: {}", current.purchasing_power_diff);
        println!("Savings:          {}", current.savings_potential_diff);
        println!(
            "Real terms {:+.1}%, housing cost {:+.1}%",
            current.real_terms_change_percent, current.housing_cost_increase_percent
        );
    }

    println!("\n--- Strategy ---");
    println!("{}", indent(&result.verdict.strategic_advice));
    if !result.verdict.action_plan.is_empty() {
        println!("\nAction plan:");
        for (i, step) in result.verdict.action_plan.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }
}

fn print_comparison(table: &ComparisonTable) {
    const LABEL_WIDTH: usize = 22;
    const CELL_WIDTH: usize = 24;

    print!("{:<width$}", "METRIC", width = LABEL_WIDTH);
    for column in &table.columns {
        let heading = format!("{}{} ({})", column.tone.marker(), column.job_title, column.city);
        print!("{:<width$}", truncate(&heading, CELL_WIDTH - 2), width = CELL_WIDTH);
    }
    println!();
    println!("{}", "-".repeat(LABEL_WIDTH + CELL_WIDTH * table.columns.len()));

    for row in &table.rows {
        print!("{:<width$}", row.label(), width = LABEL_WIDTH);
        for cell in &row.cells {
            let text = format!("{}{}", cell.tone.marker(), cell.text);
            print!("{:<width$}", truncate(&text, CELL_WIDTH - 2), width = CELL_WIDTH);
        }
        println!();
    }
    println!("\n(+ good, ~ caution, ! concern, * headline figure)");
}

fn print_list(items: &[String]) {
    for item in items {
        let wrapped = textwrap::fill(item, textwrap::Options::new(76).initial_indent("  - ").subsequent_indent("    "));
        println!("{}", wrapped);
    }
}

fn indent(text: &str) -> String {
    textwrap::fill(text, textwrap::Options::new(78).initial_indent("  ").subsequent_indent("  "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_analyze() {
        let cli = Cli::parse_from(["offerlens", "analyze", "offer.json", "--save", "-m", "gpt-4o"]);
        match cli.command {
            Commands::Analyze { file, save, json, model, no_search } => {
                assert_eq!(file, PathBuf::from("offer.json"));
                assert!(save);
                assert!(!json);
                assert_eq!(model.as_deref(), Some("gpt-4o"));
                assert!(!no_search);
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_cli_parse_compare_requires_ids() {
        assert!(Cli::try_parse_from(["offerlens", "compare"]).is_err());

        let cli = Cli::parse_from(["offerlens", "-vv", "compare", "ab12", "cd34"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Compare { ids, skip_missing } => {
                assert_eq!(ids, vec!["ab12", "cd34"]);
                assert!(!skip_missing);
            }
            _ => panic!("Expected Compare command"),
        }
    }

    #[test]
    fn test_cli_parse_compare_skip_missing() {
        let cli = Cli::parse_from(["offerlens", "compare", "ab12", "--skip-missing"]);
        match cli.command {
            Commands::Compare { ids, skip_missing } => {
                assert_eq!(ids, vec!["ab12"]);
                assert!(skip_missing);
            }
            _ => panic!("Expected Compare command"),
        }
    }

    #[test]
    fn test_cli_show_flags_conflict() {
        assert!(Cli::try_parse_from(["offerlens", "show", "ab12", "--markdown", "--json"]).is_err());
    }

    #[test]
    fn test_read_offer_normalizes_and_floors() {
        let path = std::env::temp_dir().join(format!("offerlens_offer_{}.json", uuid::Uuid::new_v4()));
        let mut value = serde_json::to_value(OfferInput::sample()).unwrap();
        value["currency"] = serde_json::json!(" eur ");
        value["city"] = serde_json::json!(" Berlin ");
        value["grossAnnualSalary"] = serde_json::json!(85000.75);
        std::fs::write(&path, value.to_string()).unwrap();

        let input = read_offer(&path).unwrap();
        assert_eq!(input.currency, "EUR");
        assert_eq!(input.city, "Berlin");
        assert_eq!(input.gross_annual_salary, 85000);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Zürich", 10), "Zürich");
        assert_eq!(truncate("Ingénieur logiciel principal", 10), "Ingénie...");
    }
}
