use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// --- Offer input ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthInsurance {
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Industry {
    Technology,
    Healthcare,
    Finance,
    Engineering,
    Education,
    Government,
    Logistics,
    Marketing,
    Manufacturing,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CareerGoal {
    Money,
    Growth,
    Stability,
    Relocation,
    #[serde(rename = "Brand Value")]
    BrandValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferInput {
    pub job_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub country: String,
    pub city: String,
    #[serde(deserialize_with = "whole_number")]
    pub gross_annual_salary: i64,
    pub currency: String,
    #[serde(default)]
    pub bonus_structure: String,
    #[serde(default, deserialize_with = "whole_number")]
    pub signing_bonus: i64,
    #[serde(default)]
    pub equity_details: String,
    pub employment_type: String,
    #[serde(deserialize_with = "whole_number")]
    pub work_hours_per_week: i64,
    #[serde(default)]
    pub visa_required: bool,
    pub health_insurance: HealthInsurance,
    #[serde(default)]
    pub relocation_package: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_whole_number"
    )]
    pub estimated_monthly_rent: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_whole_number"
    )]
    pub current_salary: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_country: Option<String>,
    #[serde(deserialize_with = "whole_number")]
    pub years_of_experience: i64,
    pub industry: Industry,
    pub career_goal: CareerGoal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} cannot be negative (got {value})")]
    Negative { field: &'static str, value: i64 },
    #[error("{field} must be greater than zero (got {value})")]
    NotPositive { field: &'static str, value: i64 },
    #[error("currency must be a 3-letter code (got '{0}')")]
    InvalidCurrency(String),
}

impl OfferInput {
    /// Checks the field invariants that must hold before an offer is sent
    /// to the analysis engine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("jobTitle", &self.job_title),
            ("country", &self.country),
            ("city", &self.city),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field));
            }
        }

        let non_negative = [
            ("grossAnnualSalary", Some(self.gross_annual_salary)),
            ("signingBonus", Some(self.signing_bonus)),
            ("yearsOfExperience", Some(self.years_of_experience)),
            ("workHoursPerWeek", Some(self.work_hours_per_week)),
            ("currentSalary", self.current_salary),
            ("estimatedMonthlyRent", self.estimated_monthly_rent),
        ];
        for (field, value) in non_negative {
            if let Some(value) = value {
                if value < 0 {
                    return Err(ValidationError::Negative { field, value });
                }
            }
        }

        if self.gross_annual_salary == 0 {
            return Err(ValidationError::NotPositive {
                field: "grossAnnualSalary",
                value: 0,
            });
        }
        if self.work_hours_per_week == 0 {
            return Err(ValidationError::NotPositive {
                field: "workHoursPerWeek",
                value: 0,
            });
        }

        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(self.currency.clone()));
        }

        Ok(())
    }

    /// Trims free-text identity fields and upper-cases the currency code.
    pub fn normalized(mut self) -> Self {
        self.job_title = self.job_title.trim().to_string();
        self.country = self.country.trim().to_string();
        self.city = self.city.trim().to_string();
        self.currency = self.currency.trim().to_ascii_uppercase();
        self
    }

    pub fn sample() -> Self {
        Self {
            job_title: "Senior Software Engineer".to_string(),
            company_name: Some("Example GmbH".to_string()),
            country: "Germany".to_string(),
            city: "Berlin".to_string(),
            gross_annual_salary: 90000,
            currency: "EUR".to_string(),
            bonus_structure: "10% annual performance bonus".to_string(),
            signing_bonus: 5000,
            equity_details: String::new(),
            employment_type: "Full-time".to_string(),
            work_hours_per_week: 40,
            visa_required: false,
            health_insurance: HealthInsurance::Full,
            relocation_package: String::new(),
            estimated_monthly_rent: None,
            current_salary: None,
            current_country: None,
            years_of_experience: 5,
            industry: Industry::Technology,
            career_goal: CareerGoal::Growth,
        }
    }
}

/// Accepts any JSON number and floors it, so fractional amounts never
/// propagate. Negative values are kept for `validate` to reject.
fn whole_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    floor_number(&number).map_err(serde::de::Error::custom)
}

fn optional_whole_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Number>::deserialize(deserializer)? {
        Some(number) => floor_number(&number).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Integers pass through exactly; only fractional values go through `f64`.
fn floor_number(number: &serde_json::Number) -> Result<i64, String> {
    if let Some(value) = number.as_i64() {
        return Ok(value);
    }
    if number.is_u64() {
        return Err(format!("{} is too large", number));
    }
    match number.as_f64() {
        Some(value) if value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64 => {
            Ok(value.floor() as i64)
        }
        _ => Err(format!("{} is not a representable whole number", number)),
    }
}

// --- Analysis result ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    Medium,
    High,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Low => "Low",
            Level::Medium => "Medium",
            Level::High => "High",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "ACCEPT")]
    Accept,
    #[serde(rename = "NEGOTIATE")]
    Negotiate,
    #[serde(rename = "REJECT")]
    Reject,
    #[serde(rename = "ACCEPT WITH CAUTION")]
    AcceptWithCaution,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Accept => "ACCEPT",
            Decision::Negotiate => "NEGOTIATE",
            Decision::Reject => "REJECT",
            Decision::AcceptWithCaution => "ACCEPT WITH CAUTION",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub struct CityTier(u8);

impl CityTier {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CityTier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1..=3 => Ok(CityTier(value)),
            _ => Err(format!("cityTier must be 1, 2 or 3 (got {})", value)),
        }
    }
}

impl From<CityTier> for u8 {
    fn from(tier: CityTier) -> u8 {
        tier.0
    }
}

// Floors like every other numeric field, then range-checks.
impl<'de> Deserialize<'de> for CityTier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = whole_number(deserializer)?;
        let tier = u8::try_from(value)
            .map_err(|_| format!("cityTier must be 1, 2 or 3 (got {})", value))
            .and_then(CityTier::try_from);
        tier.map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsdEquivalent {
    #[serde(deserialize_with = "whole_number")]
    pub monthly_net: i64,
    #[serde(deserialize_with = "whole_number")]
    pub yearly_net: i64,
    pub exchange_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialBreakdown {
    #[serde(deserialize_with = "whole_number")]
    pub monthly_net_income: i64,
    #[serde(deserialize_with = "whole_number")]
    pub yearly_net_income: i64,
    pub tax_assumptions: String,
    pub effective_tax_rate: f64,
    pub usd_equivalent: UsdEquivalent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostOfLiving {
    #[serde(deserialize_with = "whole_number")]
    pub rent: i64,
    #[serde(deserialize_with = "whole_number")]
    pub utilities: i64,
    #[serde(deserialize_with = "whole_number")]
    pub food: i64,
    #[serde(deserialize_with = "whole_number")]
    pub transport: i64,
    #[serde(deserialize_with = "whole_number")]
    pub healthcare: i64,
    #[serde(deserialize_with = "whole_number")]
    pub insurance: i64,
    #[serde(deserialize_with = "whole_number")]
    pub misc: i64,
    #[serde(deserialize_with = "whole_number")]
    pub total_essential: i64,
    pub city_tier: CityTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsProjection {
    #[serde(deserialize_with = "whole_number")]
    pub monthly_disposable: i64,
    #[serde(deserialize_with = "whole_number")]
    pub monthly_savings: i64,
    #[serde(deserialize_with = "whole_number")]
    pub annual_savings_potential: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    #[serde(deserialize_with = "whole_number")]
    pub purchasing_power: i64,
    #[serde(deserialize_with = "whole_number")]
    pub career_impact: i64,
    #[serde(deserialize_with = "whole_number")]
    pub salary_fairness: i64,
    #[serde(deserialize_with = "whole_number")]
    pub work_life_balance: i64,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "optional_whole_number"
    )]
    pub lifestyle_impact: Option<i64>,
    pub decision_confidence: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    #[serde(deserialize_with = "whole_number")]
    pub avg_weekly_hours: i64,
    #[serde(deserialize_with = "whole_number")]
    pub min_paid_leave: i64,
    #[serde(deserialize_with = "whole_number")]
    pub public_holidays: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub level: Level,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Negotiation {
    pub is_competitive: bool,
    pub market_range: String,
    pub suggested_negotiation_range: String,
    pub weak_components: Vec<String>,
    pub negotiation_items: Vec<String>,
}

/// Benchmark against the user's current situation; only present when
/// `currentSalary`/`currentCountry` were supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentComparison {
    pub purchasing_power_diff: String,
    pub savings_potential_diff: String,
    pub real_terms_change_percent: f64,
    pub housing_cost_increase_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub decision: Decision,
    pub reasoning: String,
    pub strategic_advice: String,
    pub action_plan: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub financial_breakdown: FinancialBreakdown,
    pub cost_of_living: CostOfLiving,
    pub savings_projection: SavingsProjection,
    pub scores: Scores,
    pub global_metrics: GlobalMetrics,
    pub risk_analysis: RiskAnalysis,
    pub warnings: Vec<String>,
    pub negotiation: Negotiation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<CurrentComparison>,
    pub verdict: Verdict,
    pub raw_markdown: String,
}

impl AnalysisResult {
    /// Range checks serde cannot express. Returns a description of the
    /// first out-of-range field.
    pub fn check_ranges(&self) -> Result<(), String> {
        let rate = self.financial_breakdown.effective_tax_rate;
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!("effectiveTaxRate {} is outside 0-100", rate));
        }
        if self.financial_breakdown.yearly_net_income < 0 {
            return Err(format!(
                "yearlyNetIncome {} is negative",
                self.financial_breakdown.yearly_net_income
            ));
        }

        let scores = &self.scores;
        let mut bounded = vec![
            ("purchasingPower", scores.purchasing_power, 1, 10),
            ("careerImpact", scores.career_impact, 1, 10),
            ("workLifeBalance", scores.work_life_balance, 1, 10),
            ("salaryFairness", scores.salary_fairness, 0, 100),
        ];
        if let Some(impact) = scores.lifestyle_impact {
            bounded.push(("lifestyleImpact", impact, 0, 100));
        }
        for (field, value, min, max) in bounded {
            if value < min || value > max {
                return Err(format!(
                    "scores.{} {} is outside {}-{}",
                    field, value, min, max
                ));
            }
        }

        Ok(())
    }
}

// --- Saved offers ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedOffer {
    pub id: String,
    pub input: OfferInput,
    pub result: AnalysisResult,
    pub timestamp: DateTime<Utc>,
}

impl SavedOffer {
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}
