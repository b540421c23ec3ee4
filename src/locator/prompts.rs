/// VLM prompts for the grounding and selection steps.
use crate::locator::element::UiElement;
use crate::perception::types::BoundingBox;

/// Context lines shared by both prompts: anchors, page, per-run data.
fn element_context(element: &UiElement, test_data: &str) -> String {
    let mut ctx = String::new();
    if !element.location_details.trim().is_empty() {
        ctx.push_str(&format!("Location hints: {}\n", element.location_details.trim()));
    }
    if !element.page_summary.trim().is_empty() {
        ctx.push_str(&format!("Page: {}\n", element.page_summary.trim()));
    }
    if element.is_data_dependent() {
        ctx.push_str(&format!(
            "The element displays run-specific data for these attributes: {}.\n\
             Use the values from this run's test data: {}\n",
            element.data_dependent_attributes.join(", "),
            if test_data.trim().is_empty() { "(none)" } else { test_data.trim() },
        ));
    }
    ctx
}

/// Ask for every visual occurrence of the described element, in a 0..`scale` frame.
pub fn grounding_prompt(element: &UiElement, test_data: &str, scale: f64) -> String {
    format!(
        "Locate UI elements in the screenshot.\n\n\
         Target: {desc}\n\
         {ctx}\n\
         Return a bounding box for EVERY visual occurrence that looks like the target. \
         Coordinates are normalized to 0..{scale} on both axes, (0,0) is the top-left corner. \
         If nothing matches, return an empty list.\n\
         Reply ONLY with JSON: {{\"boxes\": [{{\"x_min\": 0, \"y_min\": 0, \"x_max\": 0, \"y_max\": 0}}]}}",
        desc = element.description.trim(),
        ctx = element_context(element, test_data),
        scale = scale.round() as i64,
    )
}

/// Ask for the single label whose box best matches the element.
///
/// Every label is also listed with its pixel rectangle, so the answer does not
/// depend on the model reading the burned-in tags alone.
pub fn selection_prompt(element: &UiElement, test_data: &str, candidates: &[(String, BoundingBox)]) -> String {
    let listing: String = candidates
        .iter()
        .map(|(label, b)| {
            format!(
                "- {label}: x={} y={} w={} h={}\n",
                b.x, b.y, b.width, b.height
            )
        })
        .collect();
    format!(
        "The screenshot shows {n} labelled candidate boxes.\n\n\
         Target: {desc}\n\
         {ctx}\n\
         Candidates:\n{listing}\n\
         Pick the ONE candidate that best matches the target.\n\
         Reply ONLY with JSON: {{\"label\": \"<label>\"}}",
        n = candidates.len(),
        desc = element.description.trim(),
        ctx = element_context(element, test_data),
        listing = listing,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grounding_prompt_includes_test_data_only_when_data_dependent() {
        let plain = UiElement::new("btn", "Blue Submit button").with_location_details("bottom right");
        let p = grounding_prompt(&plain, "user=alice", 1000.0);
        assert!(p.contains("Blue Submit button"));
        assert!(p.contains("bottom right"));
        assert!(p.contains("0..1000"));
        assert!(!p.contains("alice"));

        let dd = plain.with_data_dependent_attributes(vec!["user name".into()]);
        let p = grounding_prompt(&dd, "user=alice", 1000.0);
        assert!(p.contains("user name"));
        assert!(p.contains("alice"));
    }

    #[test]
    fn test_selection_prompt_lists_labels_with_boxes() {
        let el = UiElement::new("btn", "OK");
        let p = selection_prompt(
            &el,
            "",
            &[
                ("ab".into(), BoundingBox::new(1, 2, 3, 4)),
                ("cd".into(), BoundingBox::new(5, 6, 7, 8)),
            ],
        );
        assert!(p.contains("- ab: x=1 y=2 w=3 h=4"));
        assert!(p.contains("- cd: x=5 y=6 w=7 h=8"));
        assert!(p.contains("2 labelled"));
    }
}
