use std::fmt;

use crate::models::FinancialSnapshot;

/// Fields a snapshot must carry to be usable downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    MarketCap,
    TotalRevenue,
    FreeCashFlow,
    TotalAssets,
    CurrencyCode,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequiredField::MarketCap => "market_cap",
            RequiredField::TotalRevenue => "total_revenue",
            RequiredField::FreeCashFlow => "free_cash_flow",
            RequiredField::TotalAssets => "total_assets",
            RequiredField::CurrencyCode => "currency_code",
        };
        f.write_str(name)
    }
}

fn is_present(value: Option<f64>) -> bool {
    matches!(value, Some(v) if !v.is_nan())
}

/// Required fields that are absent, null or NaN
pub fn missing_fields(snapshot: &FinancialSnapshot) -> Vec<RequiredField> {
    let mut missing = Vec::new();
    if !is_present(snapshot.market_cap) {
        missing.push(RequiredField::MarketCap);
    }
    if !is_present(snapshot.total_revenue) {
        missing.push(RequiredField::TotalRevenue);
    }
    if !is_present(snapshot.free_cash_flow) {
        missing.push(RequiredField::FreeCashFlow);
    }
    if !is_present(snapshot.total_assets) {
        missing.push(RequiredField::TotalAssets);
    }
    if snapshot.currency_code.as_deref().map_or(true, |c| c.trim().is_empty()) {
        missing.push(RequiredField::CurrencyCode);
    }
    missing
}

/// A snapshot is valid when market cap, revenue, free cash flow, assets and
/// currency code are all present
pub fn is_valid(snapshot: &FinancialSnapshot) -> bool {
    missing_fields(snapshot).is_empty()
}

/// Outcome of evaluating a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    Missing(Vec<RequiredField>),
    UnsupportedCurrency(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Valid => f.write_str("valid"),
            Validation::Missing(fields) => {
                let names: Vec<String> = fields.iter().map(|field| field.to_string()).collect();
                write!(f, "missing {}", names.join(", "))
            }
            Validation::UnsupportedCurrency(code) => write!(f, "unsupported currency {}", code),
        }
    }
}

/// Presence check plus an optional currency allow-list
#[derive(Debug, Clone, Default)]
pub struct TickerValidator {
    allowed_currencies: Vec<String>,
}

impl TickerValidator {
    /// An empty list accepts any currency
    pub fn new(allowed_currencies: &[String]) -> Self {
        Self {
            allowed_currencies: allowed_currencies
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
        }
    }

    pub fn evaluate(&self, snapshot: &FinancialSnapshot) -> Validation {
        let missing = missing_fields(snapshot);
        if !missing.is_empty() {
            return Validation::Missing(missing);
        }

        if let Some(code) = snapshot.currency_code.as_deref() {
            let code = code.trim().to_uppercase();
            if !self.allowed_currencies.is_empty() && !self.allowed_currencies.contains(&code) {
                return Validation::UnsupportedCurrency(code);
            }
        }

        Validation::Valid
    }
}
