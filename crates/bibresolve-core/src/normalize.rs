//! Field-repair passes over a freshly digested reference.
//!
//! Citation parsers routinely put the right numbers in the wrong slots.
//! Each pass here is an explicit, named transformation with a documented
//! precondition and effect, applied once between digestion and hypothesis
//! generation; comparators and scoring never patch fields inline.

use crate::reference::DigestedReference;

/// Precondition: the volume slot duplicates the publication year while the
/// issue slot holds a plain number (a common slip for venues that print
/// "2019, issue 233" style headers).
///
/// Effect: the issue becomes the volume; the issue slot is cleared.
pub fn swap_year_in_volume(reference: &mut DigestedReference) -> bool {
    let Some(year) = reference.year else {
        return false;
    };
    let volume_is_year = reference
        .volume
        .as_deref()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .is_some_and(|v| v == year);
    let issue_numeric = reference
        .issue
        .as_deref()
        .is_some_and(|i| !i.is_empty() && i.chars().all(|c| c.is_ascii_digit()));

    if !(volume_is_year && issue_numeric) {
        return false;
    }
    reference.volume = reference.issue.take();
    tracing::debug!(refstr = %reference.refstr, "swapped year out of the volume slot");
    true
}

/// Precondition: the raw reference text mentions the year twice, the page
/// slot is empty, and the volume slot holds a number other than the year.
/// Venues without real volume numbers use the year as the volume, so the
/// number the parser filed under volume is actually the page/id.
///
/// Effect: the volume moves to the page slot and the year takes its place.
pub fn fold_duplicated_year(reference: &mut DigestedReference) -> bool {
    let Some(year) = reference.year else {
        return false;
    };
    if reference.page.is_some() {
        return false;
    }
    let year_str = year.to_string();
    if reference.refstr.matches(&year_str).count() < 2 {
        return false;
    }
    let volume_is_other_number = reference
        .volume
        .as_deref()
        .is_some_and(|v| v.chars().all(|c| c.is_ascii_digit()) && v != year_str);
    if !volume_is_other_number {
        return false;
    }
    reference.page = reference.volume.replace(year_str);
    tracing::debug!(refstr = %reference.refstr, "remapped volume to page for year-volume venue");
    true
}

/// Run every pass in order. Passes are independent; each applies only when
/// its precondition holds.
pub fn apply_all(reference: &mut DigestedReference) {
    swap_year_in_volume(reference);
    fold_duplicated_year(reference);
}
