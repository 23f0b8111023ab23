use crate::models::{Decision, SavedOffer};

pub const MAX_COMPARE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompareError {
    #[error("at most {max} offers can be compared at once")]
    TooManySelected { max: usize },
    #[error("no saved offer with id {0}")]
    UnknownOffer(String),
    #[error("offer {0} is selected more than once")]
    DuplicateSelection(String),
}

/// Ordered, bounded set of offer ids picked for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<String>,
    max: usize,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(MAX_COMPARE)
    }
}

impl Selection {
    pub fn new(max: usize) -> Self {
        Self { ids: Vec::new(), max }
    }

    pub fn from_ids<I, S>(ids: I, max: usize) -> Result<Self, CompareError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Self::new(max);
        for id in ids {
            let id = id.into();
            if selection.contains(&id) {
                return Err(CompareError::DuplicateSelection(id));
            }
            if !selection.toggle(&id) {
                return Err(CompareError::TooManySelected { max });
            }
        }
        Ok(selection)
    }

    /// Deselects a selected id, or appends it if there is room. Returns
    /// whether the id is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        if let Some(pos) = self.ids.iter().position(|selected| selected == id) {
            self.ids.remove(pos);
            false
        } else if !self.is_full() {
            self.ids.push(id.to_string());
            true
        } else {
            false
        }
    }

    /// Drops ids whose records are gone from the store.
    pub fn retain_existing(&mut self, offers: &[SavedOffer]) {
        self.ids.retain(|id| offers.iter().any(|offer| &offer.id == id));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|selected| selected == id)
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.max
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// Presentation hint attached to a column or cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Highlight,
    Positive,
    Caution,
    Negative,
}

impl Tone {
    pub fn for_decision(decision: Decision) -> Self {
        match decision {
            Decision::Accept => Tone::Positive,
            Decision::Reject => Tone::Negative,
            Decision::Negotiate | Decision::AcceptWithCaution => Tone::Caution,
        }
    }

    /// Short plain-text marker for terminals without color.
    pub fn marker(self) -> &'static str {
        match self {
            Tone::Neutral => "",
            Tone::Highlight => "*",
            Tone::Positive => "+",
            Tone::Caution => "~",
            Tone::Negative => "!",
        }
    }

    /// Banding for 0-100 scores.
    pub fn for_score(score: i64) -> Self {
        if score >= 71 {
            Tone::Positive
        } else if score >= 41 {
            Tone::Caution
        } else {
            Tone::Negative
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    AnnualNetSalary,
    EffectiveTaxRate,
    MonthlySavings,
    FairnessScore,
    CareerImpact,
    WorkLifeBalance,
    Rent,
    Food,
    Transport,
    Healthcare,
    RiskLevel,
    Confidence,
    Verdict,
}

impl Metric {
    pub const ALL: [Metric; 13] = [
        Metric::AnnualNetSalary,
        Metric::EffectiveTaxRate,
        Metric::MonthlySavings,
        Metric::FairnessScore,
        Metric::CareerImpact,
        Metric::WorkLifeBalance,
        Metric::Rent,
        Metric::Food,
        Metric::Transport,
        Metric::Healthcare,
        Metric::RiskLevel,
        Metric::Confidence,
        Metric::Verdict,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::AnnualNetSalary => "Annual Net Salary",
            Metric::EffectiveTaxRate => "Effective Tax Rate",
            Metric::MonthlySavings => "Monthly Savings",
            Metric::FairnessScore => "Fairness Score",
            Metric::CareerImpact => "Career Impact",
            Metric::WorkLifeBalance => "Work-Life Balance",
            Metric::Rent => "Rent (Monthly)",
            Metric::Food => "Food (Monthly)",
            Metric::Transport => "Transport (Monthly)",
            Metric::Healthcare => "Healthcare (Monthly)",
            Metric::RiskLevel => "Risk Level",
            Metric::Confidence => "Confidence",
            Metric::Verdict => "Verdict",
        }
    }

    /// Renders this metric for one record, in that record's own currency.
    pub fn cell(self, offer: &SavedOffer) -> Cell {
        let result = &offer.result;
        let money = |amount: i64| format_money(&offer.input.currency, amount);
        let (text, tone) = match self {
            Metric::AnnualNetSalary => (money(result.financial_breakdown.yearly_net_income), Tone::Highlight),
            Metric::EffectiveTaxRate => (
                format!("{}%", format_rate(result.financial_breakdown.effective_tax_rate)),
                Tone::Neutral,
            ),
            Metric::MonthlySavings => (money(result.savings_projection.monthly_savings), Tone::Neutral),
            Metric::FairnessScore => (
                format!("{}%", result.scores.salary_fairness),
                Tone::for_score(result.scores.salary_fairness),
            ),
            Metric::CareerImpact => (format!("{}/10", result.scores.career_impact), Tone::Neutral),
            Metric::WorkLifeBalance => (format!("{}/10", result.scores.work_life_balance), Tone::Neutral),
            Metric::Rent => (money(result.cost_of_living.rent), Tone::Neutral),
            Metric::Food => (money(result.cost_of_living.food), Tone::Neutral),
            Metric::Transport => (money(result.cost_of_living.transport), Tone::Neutral),
            Metric::Healthcare => (money(result.cost_of_living.healthcare), Tone::Neutral),
            Metric::RiskLevel => (result.risk_analysis.level.to_string(), Tone::Neutral),
            Metric::Confidence => (result.scores.decision_confidence.to_string(), Tone::Neutral),
            Metric::Verdict => (
                result.verdict.decision.to_string(),
                Tone::for_decision(result.verdict.decision),
            ),
        };
        Cell { text, tone }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: String,
    pub job_title: String,
    pub city: String,
    pub decision: Decision,
    pub tone: Tone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub metric: Metric,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn label(&self) -> &'static str {
        self.metric.label()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

/// Projects the selected records into the fixed metric rows. Columns follow
/// selection order; values stay in each record's native currency.
pub fn project(records: &[SavedOffer], selection: &Selection) -> Result<ComparisonTable, CompareError> {
    if selection.len() > selection.max() {
        return Err(CompareError::TooManySelected { max: selection.max() });
    }

    let selected = selection
        .ids()
        .iter()
        .map(|id| {
            records
                .iter()
                .find(|offer| &offer.id == id)
                .ok_or_else(|| CompareError::UnknownOffer(id.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let columns = selected
        .iter()
        .map(|offer| Column {
            id: offer.id.clone(),
            job_title: offer.input.job_title.clone(),
            city: offer.input.city.clone(),
            decision: offer.result.verdict.decision,
            tone: Tone::for_decision(offer.result.verdict.decision),
        })
        .collect();

    let rows = Metric::ALL
        .iter()
        .map(|&metric| Row {
            metric,
            cells: selected.iter().map(|offer| metric.cell(offer)).collect(),
        })
        .collect();

    Ok(ComparisonTable { columns, rows })
}

pub fn format_money(currency: &str, amount: i64) -> String {
    format!("{} {}", currency, group_thousands(amount))
}

/// en-US digit grouping: 1234567 -> "1,234,567".
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn format_rate(rate: f64) -> String {
    if rate.fract() == 0.0 {
        format!("{}", rate as i64)
    } else {
        format!("{:.1}", rate)
    }
}
