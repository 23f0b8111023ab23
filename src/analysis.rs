use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::ai::{AnalysisEngine, EngineError, EngineRequest};
use crate::models::{AnalysisResult, OfferInput, ValidationError};

const SYSTEM_INSTRUCTION: &str = r#"You are a global career decision engine that evaluates job offers for professionals considering a move.
Assess every offer with precision, taking into account the local tax system, cost of living, industry risk and real purchasing power.

RULES:
1. LIVE DATA: Use the search tool to look up current tax rates, cost-of-living figures and salary benchmarks for the exact city and country. Prefer real data over estimates.
2. WHOLE NUMBERS: Every financial figure (salary, rent, savings and so on) must be an integer.
3. TAX: Model progressive income tax plus social security contributions for the target country.
4. CITY TIER: Classify the city as tier 1 (major metro), tier 2 (mid-size) or tier 3 (smaller) and scale living costs to match.
5. CURRENCY: Use the currency given in the offer. Report USD equivalents with a current approximate exchange rate.
6. INDUSTRY: Adjust the risk level and fairness score to the offer's industry.
7. LIFESTYLE: When currentSalary and currentCountry are present, compute the real change in lifestyle and fill in "comparison" and "lifestyleImpact".
8. WORK-LIFE: Give the country's average weekly hours, statutory minimum paid leave and public holidays.
9. WARNINGS: Add a "Cost Shock" warning when rent rises by more than 80% or savings fall by more than 30% relative to the current situation.
10. FAIRNESS: Score salary fairness from 0 to 100 against the market for this role, location and experience.
11. CONFIDENCE: Report Low, Medium or High decision confidence depending on data quality and market stability.

Reply with a single JSON document in exactly this shape:
{
  "financialBreakdown": {
    "monthlyNetIncome": integer,
    "yearlyNetIncome": integer,
    "taxAssumptions": "string",
    "effectiveTaxRate": number (0-100),
    "usdEquivalent": { "monthlyNet": integer, "yearlyNet": integer, "exchangeRate": number }
  },
  "costOfLiving": {
    "rent": integer, "utilities": integer, "food": integer, "transport": integer,
    "healthcare": integer, "insurance": integer, "misc": integer,
    "totalEssential": integer,
    "cityTier": 1 | 2 | 3
  },
  "savingsProjection": { "monthlyDisposable": integer, "monthlySavings": integer, "annualSavingsPotential": integer },
  "scores": {
    "purchasingPower": integer (1-10),
    "careerImpact": integer (1-10),
    "salaryFairness": integer (0-100),
    "workLifeBalance": integer (1-10),
    "lifestyleImpact": integer (0-100) (optional),
    "decisionConfidence": "Low" | "Medium" | "High"
  },
  "globalMetrics": { "avgWeeklyHours": integer, "minPaidLeave": integer, "publicHolidays": integer },
  "riskAnalysis": { "level": "Low" | "Medium" | "High", "explanation": "string" },
  "warnings": ["string"],
  "negotiation": {
    "isCompetitive": boolean,
    "marketRange": "string",
    "suggestedNegotiationRange": "string",
    "weakComponents": ["string"],
    "negotiationItems": ["string"]
  },
  "comparison": {
    "purchasingPowerDiff": "string",
    "savingsPotentialDiff": "string",
    "realTermsChangePercent": number,
    "housingCostIncreasePercent": number
  } (optional),
  "verdict": {
    "decision": "ACCEPT" | "NEGOTIATE" | "REJECT" | "ACCEPT WITH CAUTION",
    "reasoning": "string",
    "strategicAdvice": "string",
    "actionPlan": ["string"]
  },
  "rawMarkdown": "A complete, detailed markdown report (2000+ words)"
}

Be analytical, structured and decisive."#;

const NO_SEARCH_NOTE: &str =
    "NOTE: Search tool is unavailable. Use your internal knowledge base for the latest data.";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid offer: {0}")]
    Validation(#[from] ValidationError),
    #[error("analysis engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("analysis engine returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode offer for the engine: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Which of the (at most two) engine calls is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Grounded,
    Ungrounded,
}

impl Attempt {
    fn number(self) -> u8 {
        match self {
            Attempt::Grounded => 1,
            Attempt::Ungrounded => 2,
        }
    }
}

enum Step {
    Call(Attempt),
    Done(Result<AnalysisResult, AnalysisError>),
}

/// Attempt 1 may fall through to attempt 2 only on a capability failure.
/// Attempt 2 always terminates.
fn transition(attempt: Attempt, outcome: Result<String, EngineError>) -> Step {
    match (attempt, outcome) {
        (_, Ok(text)) => Step::Done(parse_response(&text)),
        (Attempt::Grounded, Err(EngineError::CapabilityUnavailable(reason))) => {
            warn!("Search capability rejected ({}); retrying without it", reason);
            Step::Call(Attempt::Ungrounded)
        }
        (_, Err(EngineError::EmptyResponse)) => Step::Done(Err(AnalysisError::InvalidResponse(
            EngineError::EmptyResponse.to_string(),
        ))),
        (_, Err(err)) => Step::Done(Err(AnalysisError::EngineUnavailable(err.to_string()))),
    }
}

pub struct AnalysisClient {
    engine: Box<dyn AnalysisEngine>,
    grounding: bool,
}

impl AnalysisClient {
    pub fn new(engine: Box<dyn AnalysisEngine>) -> Self {
        Self { engine, grounding: true }
    }

    /// Skips the search-grounded attempt and goes straight to the
    /// internal-knowledge instruction.
    pub fn without_grounding(mut self) -> Self {
        self.grounding = false;
        self
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }

    pub fn analyze(&self, input: &OfferInput) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_on(input, chrono::Local::now().date_naive())
    }

    pub fn analyze_on(&self, input: &OfferInput, today: NaiveDate) -> Result<AnalysisResult, AnalysisError> {
        input.validate()?;
        let prompt = build_prompt(input, today)?;

        let first = if self.grounding { Attempt::Grounded } else { Attempt::Ungrounded };
        let mut step = Step::Call(first);
        loop {
            match step {
                Step::Call(attempt) => {
                    let request = build_request(&prompt, attempt);
                    info!(
                        "Analysis attempt {} for '{}' in {} (model {}, grounding {})",
                        attempt.number(),
                        input.job_title,
                        input.city,
                        self.engine.model_name(),
                        request.grounding
                    );
                    let outcome = self.engine.generate(&request);
                    step = transition(attempt, outcome);
                }
                Step::Done(result) => return result,
            }
        }
    }
}

fn build_prompt(input: &OfferInput, today: NaiveDate) -> Result<String, serde_json::Error> {
    let offer = serde_json::to_string_pretty(input)?;
    Ok(format!(
        "Analyze the following job offer:\n{}\n\nCurrent Date: {}\nCity/Country: {}, {}\n",
        offer,
        today.format("%Y-%m-%d"),
        input.city,
        input.country
    ))
}

fn build_request(prompt: &str, attempt: Attempt) -> EngineRequest {
    let system_instruction = match attempt {
        Attempt::Grounded => SYSTEM_INSTRUCTION.to_string(),
        Attempt::Ungrounded => format!("{}\n\n{}", SYSTEM_INSTRUCTION, NO_SEARCH_NOTE),
    };
    EngineRequest {
        prompt: prompt.to_string(),
        system_instruction,
        json_output: true,
        grounding: attempt == Attempt::Grounded,
    }
}

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)(?:```|$)").expect("valid regex"));
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)(?:```|$)").expect("valid regex"));

/// Returns the body of the first fenced code block (a ```json fence wins
/// over a bare one), or the trimmed text when there is no fence. A reply
/// that already starts with `{` is taken as bare JSON, since the markdown
/// report inside it may itself contain fences.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with('{') {
        return text;
    }
    JSON_FENCE
        .captures(text)
        .or_else(|| ANY_FENCE.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
        .unwrap_or(text)
}

pub fn parse_response(text: &str) -> Result<AnalysisResult, AnalysisError> {
    let body = strip_code_fence(text);
    debug!("Parsing {} bytes of engine output", body.len());

    let result: AnalysisResult = serde_json::from_str(body)
        .map_err(|e| AnalysisError::InvalidResponse(format!("response does not match the schema: {}", e)))?;
    result.check_ranges().map_err(AnalysisError::InvalidResponse)?;
    Ok(result)
}
