//! Stateless validation rules for the technical-visit form and the Enedis
//! consent request. Every applicable rule runs; callers always receive the
//! full error set in one pass.

use serde::{Deserialize, Serialize};

/// Roof types accepted on the technical-visit form.
pub const VALID_ROOF_TYPES: [&str; 5] = ["flat", "sloped_tiles", "sloped_slate", "metal", "other"];

/// Distance buckets between the array and the electrical panel.
pub const VALID_ELECTRICAL_DISTANCES: [&str; 4] = ["<30m", "30-60m", "60-100m", ">100m"];

/// Minimum number of site photos required before the visit can be closed.
pub const MIN_PHOTOS_REQUIRED: usize = 3;

/// One rejected field with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Technical-visit form payload as submitted by the installer. Fields are
/// optional so that "absent" and "malformed" can be reported separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalVisitForm {
    #[serde(default)]
    pub roof_type: Option<String>,
    #[serde(default)]
    pub mounting_height: Option<f64>,
    #[serde(default)]
    pub electrical_distance: Option<String>,
    #[serde(default)]
    pub obstacles: Option<Vec<String>>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub photo_ids: Option<Vec<String>>,
}

/// Validate a technical-visit form. Rules are evaluated independently and
/// the form is valid iff the returned list is empty.
pub fn validate_technical_visit_form(form: &TechnicalVisitForm) -> Vec<FieldError> {
    let mut errors = Vec::new();

    match form.roof_type.as_deref() {
        None => errors.push(FieldError::new("roofType", "roof type is required")),
        Some(value) if !VALID_ROOF_TYPES.contains(&value) => {
            errors.push(FieldError::new("roofType", "unknown roof type"));
        }
        Some(_) => {}
    }

    match form.mounting_height {
        None => errors.push(FieldError::new(
            "mountingHeight",
            "mounting height is required",
        )),
        Some(height) if !height.is_finite() => {
            errors.push(FieldError::new(
                "mountingHeight",
                "mounting height must be a number",
            ));
        }
        Some(height) if height < 0.0 => {
            errors.push(FieldError::new(
                "mountingHeight",
                "mounting height must be zero or greater",
            ));
        }
        Some(_) => {}
    }

    match form.electrical_distance.as_deref() {
        None => errors.push(FieldError::new(
            "electricalDistance",
            "electrical panel distance is required",
        )),
        Some(value) if !VALID_ELECTRICAL_DISTANCES.contains(&value) => {
            errors.push(FieldError::new(
                "electricalDistance",
                "unknown electrical panel distance",
            ));
        }
        Some(_) => {}
    }

    if form.obstacles.is_none() {
        errors.push(FieldError::new("obstacles", "obstacles must be a list"));
    }

    match form.photo_ids.as_deref() {
        None => errors.push(FieldError::new("photoIds", "photo ids must be a list")),
        Some(ids) if ids.len() < MIN_PHOTOS_REQUIRED => {
            errors.push(FieldError::new(
                "photoIds",
                format!(
                    "at least {MIN_PHOTOS_REQUIRED} photos are required ({} supplied)",
                    ids.len()
                ),
            ));
        }
        Some(_) => {}
    }

    errors
}

/// A PDL (point de livraison) is exactly 14 decimal digits.
pub fn is_valid_pdl(value: &str) -> bool {
    value.len() == 14 && value.bytes().all(|byte| byte.is_ascii_digit())
}

/// Validate an Enedis consent request before it is sent to the utility.
pub fn validate_consent_request(pdl: &str, last_name: &str, address: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if !is_valid_pdl(pdl) {
        errors.push(FieldError::new(
            "pdl",
            "PDL must be exactly 14 digits",
        ));
    }

    if last_name.trim().len() < 2 {
        errors.push(FieldError::new(
            "lastName",
            "last name must contain at least 2 characters",
        ));
    }

    if address.trim().len() < 5 {
        errors.push(FieldError::new(
            "address",
            "address must contain at least 5 characters",
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_form() -> TechnicalVisitForm {
        TechnicalVisitForm {
            roof_type: Some("sloped_tiles".to_string()),
            mounting_height: Some(4.5),
            electrical_distance: Some("30-60m".to_string()),
            obstacles: Some(vec!["chimney".to_string()]),
            comments: None,
            photo_ids: Some(vec![
                "ph-1".to_string(),
                "ph-2".to_string(),
                "ph-3".to_string(),
            ]),
        }
    }

    fn errors_for(form: &TechnicalVisitForm, field: &str) -> Vec<String> {
        validate_technical_visit_form(form)
            .into_iter()
            .filter(|error| error.field == field)
            .map(|error| error.message)
            .collect()
    }

    #[test]
    fn empty_form_reports_every_required_field() {
        let errors = validate_technical_visit_form(&TechnicalVisitForm::default());
        assert!(errors.len() >= 5);
        for field in [
            "roofType",
            "mountingHeight",
            "electricalDistance",
            "obstacles",
            "photoIds",
        ] {
            assert!(
                errors.iter().any(|error| error.field == field),
                "missing error for {field}"
            );
        }
    }

    #[test]
    fn complete_form_is_valid() {
        assert!(validate_technical_visit_form(&complete_form()).is_empty());
    }

    #[test]
    fn absent_and_malformed_roof_type_produce_distinct_messages() {
        let missing = errors_for(&TechnicalVisitForm::default(), "roofType");
        let mut invalid_form = complete_form();
        invalid_form.roof_type = Some("thatched".to_string());
        let invalid = errors_for(&invalid_form, "roofType");

        assert_eq!(missing.len(), 1);
        assert_eq!(invalid.len(), 1);
        assert_ne!(missing[0], invalid[0]);
    }

    #[test]
    fn mounting_height_of_zero_is_valid() {
        let mut form = complete_form();
        form.mounting_height = Some(0.0);
        assert!(errors_for(&form, "mountingHeight").is_empty());
    }

    #[test]
    fn negative_and_non_numeric_heights_produce_distinct_messages() {
        let mut negative_form = complete_form();
        negative_form.mounting_height = Some(-1.0);
        let negative = errors_for(&negative_form, "mountingHeight");

        let mut nan_form = complete_form();
        nan_form.mounting_height = Some(f64::NAN);
        let non_numeric = errors_for(&nan_form, "mountingHeight");

        assert_eq!(negative.len(), 1);
        assert_eq!(non_numeric.len(), 1);
        assert_ne!(negative[0], non_numeric[0]);
    }

    #[test]
    fn empty_obstacle_list_is_accepted() {
        let mut form = complete_form();
        form.obstacles = Some(Vec::new());
        assert!(errors_for(&form, "obstacles").is_empty());
    }

    #[test]
    fn photo_shortfall_reports_minimum_and_supplied_count() {
        let mut form = complete_form();
        form.photo_ids = Some(vec!["ph-1".to_string(), "ph-2".to_string()]);
        let errors = errors_for(&form, "photoIds");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains('3'));
        assert!(errors[0].contains('2'));
    }

    #[test]
    fn three_photos_satisfy_the_minimum() {
        assert!(errors_for(&complete_form(), "photoIds").is_empty());
    }

    #[test]
    fn pdl_requires_exactly_fourteen_digits() {
        assert!(is_valid_pdl("12345678901234"));
        assert!(!is_valid_pdl("1234567890123"));
        assert!(!is_valid_pdl("123456789012345"));
        assert!(!is_valid_pdl("1234567890123a"));
        assert!(!is_valid_pdl(""));
        assert!(!is_valid_pdl("12 345678901234"));
    }

    #[test]
    fn consent_request_rules_run_independently() {
        let errors = validate_consent_request("badpdl", "X", "rue");
        let fields: Vec<&str> = errors.iter().map(|error| error.field).collect();
        assert_eq!(fields, vec!["pdl", "lastName", "address"]);

        assert!(validate_consent_request("12345678901234", "Durand", "12 rue des Lilas").is_empty());
    }

    #[test]
    fn consent_request_trims_before_measuring() {
        let errors = validate_consent_request("12345678901234", "  D  ", "  1 r  ");
        let fields: Vec<&str> = errors.iter().map(|error| error.field).collect();
        assert_eq!(fields, vec!["lastName", "address"]);
    }
}
