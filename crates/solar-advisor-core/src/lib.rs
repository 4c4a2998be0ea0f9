use serde::Serialize;

pub const BUDGET_KEYWORD: &str = "budget";
pub const USAGE_KEYWORD: &str = "usage";

/// Returned whenever no record satisfies the active constraints.
pub const FALLBACK_SUMMARY: &str =
    "Sorry, I couldn't find suitable solar system data based on the provided information.";

const DEFAULT_AREA: &str = "a recommended area";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum AdvisorError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("dataset contains no records")]
    EmptyDataset,
}

/// One dataset row describing a recommended installation for a location.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Record {
    pub location: String,
    pub sunlight_hours: f64,
    pub budget_pkr: f64,
    pub usage_kwh_per_month: f64,
    pub recommended_system: String,
}

impl Record {
    /// Validate the structural fields of a dataset row.
    ///
    /// # Errors
    /// Returns [`AdvisorError::Validation`] when a label is blank or a numeric field is not finite.
    pub fn validate(&self) -> Result<(), AdvisorError> {
        if self.location.trim().is_empty() {
            return Err(AdvisorError::Validation("location must be non-empty".to_string()));
        }
        if self.recommended_system.trim().is_empty() {
            return Err(AdvisorError::Validation(
                "recommended_system must be non-empty".to_string(),
            ));
        }
        for (field, value) in [
            ("sunlight_hours", self.sunlight_hours),
            ("budget_pkr", self.budget_pkr),
            ("usage_kwh_per_month", self.usage_kwh_per_month),
        ] {
            if !value.is_finite() {
                return Err(AdvisorError::Validation(format!("{field} must be a finite number")));
            }
        }
        Ok(())
    }
}

/// Immutable, ordered table of dataset records.
///
/// Distinct locations are kept in first-occurrence order; [`match_location`] relies on that
/// order for its tie-break.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStore {
    records: Vec<Record>,
    locations: Vec<String>,
}

impl RecordStore {
    /// Build a store from records in load order.
    ///
    /// # Errors
    /// Returns an error when `records` is empty or any record fails validation.
    pub fn new(records: Vec<Record>) -> Result<Self, AdvisorError> {
        if records.is_empty() {
            return Err(AdvisorError::EmptyDataset);
        }

        let mut locations: Vec<String> = Vec::new();
        for (index, record) in records.iter().enumerate() {
            record.validate().map_err(|err| match err {
                AdvisorError::Validation(message) => {
                    AdvisorError::Validation(format!("record {index}: {message}"))
                }
                other => other,
            })?;
            if !locations.iter().any(|location| location == &record.location) {
                locations.push(record.location.clone());
            }
        }

        Ok(Self { records, locations })
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Distinct location values in first-occurrence order.
    #[must_use]
    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Filter values extracted from one question. `None` means no restriction.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Constraint {
    pub location: Option<String>,
    pub budget_ceiling: Option<f64>,
    pub usage_floor: Option<f64>,
}

impl Constraint {
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.location.is_none() && self.budget_ceiling.is_none() && self.usage_floor.is_none()
    }
}

/// Result of running one question through the pipeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Advice {
    pub constraint: Constraint,
    pub matched_records: usize,
    pub selected: Option<Record>,
    pub summary: String,
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn is_word_boundary(text: &str, index: usize) -> bool {
    let before = text[..index].chars().next_back().is_some_and(is_word_char);
    let after = text[index..].chars().next().is_some_and(is_word_char);
    before != after
}

fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    // Occurrences may overlap, so advance one character at a time.
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        if is_word_boundary(haystack, start) && is_word_boundary(haystack, end) {
            return true;
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Return the first location, in iteration order, that appears in `text` as a whole word.
///
/// Matching is case-insensitive. A location embedded in a longer word does not match.
pub fn match_location<'a, I>(text: &str, locations: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let lowered = text.to_lowercase();
    locations
        .into_iter()
        .find(|location| contains_whole_word(&lowered, &location.to_lowercase()))
}

/// Code points of the zero digit of every Unicode 15.1 decimal digit (`Nd`) block.
///
/// Each block holds the ten digits `0..=9` contiguously, in value order.
const DECIMAL_DIGIT_ZEROS: [u32; 68] = [
    0x0030, 0x0660, 0x06F0, 0x07C0, 0x0966, 0x09E6, 0x0A66, 0x0AE6, 0x0B66, 0x0BE6, 0x0C66,
    0x0CE6, 0x0D66, 0x0DE6, 0x0E50, 0x0ED0, 0x0F20, 0x1040, 0x1090, 0x17E0, 0x1810, 0x1946,
    0x19D0, 0x1A80, 0x1A90, 0x1B50, 0x1BB0, 0x1C40, 0x1C50, 0xA620, 0xA8D0, 0xA900, 0xA9D0,
    0xA9F0, 0xAA50, 0xABF0, 0xFF10, 0x104A0, 0x10D30, 0x11066, 0x110F0, 0x11136, 0x111D0,
    0x112F0, 0x11450, 0x114D0, 0x11650, 0x116C0, 0x11730, 0x118E0, 0x11950, 0x11C50, 0x11D50,
    0x11DA0, 0x11F50, 0x16A60, 0x16AC0, 0x16B50, 0x1D7CE, 0x1D7D8, 0x1D7E2, 0x1D7EC, 0x1D7F6,
    0x1E140, 0x1E2F0, 0x1E4F0, 0x1E950, 0x1FBF0,
];

/// Value of `ch` when it is a decimal digit in any script, e.g. `'٧'` or `'７'` give `7`.
fn decimal_digit_value(ch: char) -> Option<u32> {
    let code = u32::from(ch);
    let block = DECIMAL_DIGIT_ZEROS.partition_point(|&zero| zero <= code).checked_sub(1)?;
    let value = code - DECIMAL_DIGIT_ZEROS[block];
    (value < 10).then_some(value)
}

/// Find `keyword` case-insensitively, then return the first run of decimal digits anywhere after it.
///
/// Digits from any script count and are read by value, so `١٢٠` yields `120`. Decimal points and
/// thousands separators end the run: `12.5` yields `12`.
#[must_use]
pub fn extract_number(text: &str, keyword: &str) -> Option<f64> {
    let lowered = text.to_lowercase();
    let keyword = keyword.to_lowercase();
    let after_keyword = lowered.find(&keyword)? + keyword.len();

    let digits: String = lowered[after_keyword..]
        .chars()
        .skip_while(|ch| decimal_digit_value(*ch).is_none())
        .map_while(decimal_digit_value)
        .filter_map(|value| char::from_digit(value, 10))
        .collect();
    digits.parse::<f64>().ok()
}

/// Derive the location, budget ceiling and usage floor mentioned in `question`.
#[must_use]
pub fn extract_constraint(question: &str, store: &RecordStore) -> Constraint {
    Constraint {
        location: match_location(question, store.locations().iter().map(String::as_str))
            .map(str::to_string),
        budget_ceiling: extract_number(question, BUDGET_KEYWORD),
        usage_floor: extract_number(question, USAGE_KEYWORD),
    }
}

/// Keep the records satisfying every present constraint, preserving their relative order.
pub fn filter_records<'a, I>(records: I, constraint: &Constraint) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let location = constraint.location.as_deref().map(str::to_lowercase);

    records
        .into_iter()
        .filter(|record| {
            if let Some(ceiling) = constraint.budget_ceiling {
                if record.budget_pkr > ceiling {
                    return false;
                }
            }
            if let Some(floor) = constraint.usage_floor {
                if record.usage_kwh_per_month < floor {
                    return false;
                }
            }
            match &location {
                Some(location) => record.location.to_lowercase() == *location,
                None => true,
            }
        })
        .collect()
}

fn requested_value(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |value| value.to_string())
}

/// Render the summary for the first filtered record, or [`FALLBACK_SUMMARY`] when none qualify.
///
/// Budget and usage show what the question asked for, not the matched record's values.
#[must_use]
pub fn render_summary(filtered: &[&Record], constraint: &Constraint) -> String {
    let Some(record) = filtered.first() else {
        return FALLBACK_SUMMARY.to_string();
    };

    let area = if constraint.location.is_some() { record.location.as_str() } else { DEFAULT_AREA };
    format!(
        "In {area}, avg sunlight: {sunlight} hours/day.\n\
         User's budget: PKR {budget}, monthly usage: {usage} kWh.\n\
         Recommended system: {system} (supports up to {capacity} kWh/mo, cost ~PKR {cost}).",
        sunlight = record.sunlight_hours,
        budget = requested_value(constraint.budget_ceiling),
        usage = requested_value(constraint.usage_floor),
        system = record.recommended_system,
        capacity = record.usage_kwh_per_month,
        cost = record.budget_pkr,
    )
}

/// Run extraction, filtering and summary rendering for one question.
#[must_use]
pub fn advise(question: &str, store: &RecordStore) -> Advice {
    let constraint = extract_constraint(question, store);
    let filtered = filter_records(store.records(), &constraint);
    tracing::debug!(
        location = constraint.location.as_deref(),
        budget_ceiling = constraint.budget_ceiling,
        usage_floor = constraint.usage_floor,
        matched = filtered.len(),
        "extracted question constraints"
    );

    let summary = render_summary(&filtered, &constraint);
    Advice {
        matched_records: filtered.len(),
        selected: filtered.first().map(|record| (*record).clone()),
        summary,
        constraint,
    }
}
