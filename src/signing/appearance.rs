//! Text content of the visible signature stamp.

use chrono::Local;

/// Lines rendered into the stamp's appearance stream, top to bottom.
///
/// The timestamp lines reflect what the preflight probe saw; the embedded
/// token itself is attached later, over the real signature bytes.
pub(crate) fn appearance_lines(
    signer_name: &str,
    location: &str,
    reason: &str,
    timestamp_requested: bool,
    timestamp_info: Option<&str>,
    tsa_display: &str,
) -> Vec<String> {
    let mut lines = vec![
        format!("Signed by: {}", signer_name),
        format!("Date: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
        format!("Location: {}", location),
        format!("Reason: {}", reason),
    ];

    if timestamp_requested {
        match timestamp_info {
            Some(info) => lines.push(format!("Timestamp: {}", info)),
            None => lines.push("Timestamp: Requested but not available".to_string()),
        }
        lines.push(format!("TSA Server: {}", tsa_display));
    } else {
        lines.push("Timestamp: Not included".to_string());
    }

    lines
}
