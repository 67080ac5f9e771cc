//! One-time page wiring plus the form helpers it installs.

use crate::page::{Page, CLASS_FADE_IN, DIMENSION_ID, NX_ID, NY_ID, NZ_ID};
use std::time::Duration;
use tarang_core::grid::{layout_for_selection, AxisUpdate, GridDimension};

/// Bootstrap waits one frame after the page is ready.
pub const FRAME: Duration = Duration::from_millis(16);

pub const DEFAULT_BROWSE_PATH: &str = "/tmp/simulation_data";

pub fn initialize_page_elements(page: &mut Page) {
    for card in page.cards.iter_mut() {
        card.add_class(CLASS_FADE_IN);
    }
    for form in page.forms.iter_mut() {
        form.validation_attached = true;
    }
    if page.field(DIMENSION_ID).is_some() {
        page.dimension_listener = true;
        update_grid_fields(page);
    }
    tracing::debug!(
        "page_initialized: cards={} forms={} dimension_listener={}",
        page.cards.len(),
        page.forms.len(),
        page.dimension_listener
    );
}

/// Re-derives nx/ny/nz from the dimension selector. Does nothing unless
/// all three axis fields exist.
pub fn update_grid_fields(page: &mut Page) {
    let Some(selection) = page.field(DIMENSION_ID).map(|field| field.value.clone()) else {
        return;
    };
    if [NX_ID, NY_ID, NZ_ID].iter().any(|id| page.field(id).is_none()) {
        tracing::debug!("grid_fields_skipped: axis field missing");
        return;
    }
    let layout = layout_for_selection(&selection);
    apply_axis(page, NX_ID, layout.nx);
    apply_axis(page, NY_ID, layout.ny);
    apply_axis(page, NZ_ID, layout.nz);
}

fn apply_axis(page: &mut Page, id: &str, update: AxisUpdate) {
    if let Some(field) = page.field_mut(id) {
        if let Some(value) = update.value {
            field.value = value.to_string();
        }
        field.disabled = !update.enabled;
        if field.disabled {
            field.invalid = false;
        }
    }
}

/// Sets the selector and runs the change handler if it is wired.
pub fn on_dimension_change(page: &mut Page, value: &str) -> bool {
    let Some(field) = page.field_mut(DIMENSION_ID) else {
        return false;
    };
    field.value = value.to_string();
    if page.dimension_listener {
        update_grid_fields(page);
    }
    true
}

pub fn cycle_dimension(page: &mut Page, forward: bool) -> Option<GridDimension> {
    let current = GridDimension::from_selection(&page.field(DIMENSION_ID)?.value);
    let next = if forward {
        current.next()
    } else {
        current.previous()
    };
    on_dimension_change(page, next.as_str());
    Some(next)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    NotFound,
    Blocked { invalid: Vec<String> },
    Submitted { fields: Vec<(String, String)> },
}

/// Marks every enabled required field that is blank. Returns their ids.
pub fn validate_form(page: &mut Page, form_id: &str) -> Option<Vec<String>> {
    let form = page.form_mut(form_id)?;
    let mut invalid = Vec::new();
    for field in form.fields.iter_mut() {
        field.invalid = field.required && !field.disabled && field.is_blank();
        if field.invalid {
            invalid.push(field.id.clone());
        }
    }
    form.was_validated = true;
    Some(invalid)
}

pub fn submit_form(page: &mut Page, form_id: &str) -> SubmitOutcome {
    let validating = match page.form(form_id) {
        Some(form) => form.validation_attached,
        None => return SubmitOutcome::NotFound,
    };
    if validating {
        let invalid = validate_form(page, form_id).unwrap_or_default();
        if !invalid.is_empty() {
            tracing::debug!("form_submit_blocked: form={form_id} invalid={invalid:?}");
            return SubmitOutcome::Blocked { invalid };
        }
    }
    match page.form(form_id) {
        Some(form) => SubmitOutcome::Submitted {
            fields: form.submission_pairs(),
        },
        None => SubmitOutcome::NotFound,
    }
}

/// Fills a path field from a prompt answer; an empty answer picks the
/// default path. `None` means the prompt was cancelled and leaves the
/// field alone.
pub fn browse_files(page: &mut Page, field_id: &str, answer: Option<&str>) -> bool {
    let Some(answer) = answer else {
        return false;
    };
    let Some(field) = page.field_mut(field_id) else {
        return false;
    };
    field.value = if answer.is_empty() {
        DEFAULT_BROWSE_PATH.to_string()
    } else {
        answer.to_string()
    };
    true
}
