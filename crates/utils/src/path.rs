/// Characters that are rejected in a file name by at least one of the platforms we run on
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Turns an arbitrary label (like a worksheet name) into something usable as a file name.
///
/// Invalid and control characters become `_`, trailing dots and spaces are dropped and an
/// empty result falls back to `"untitled"`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
	let sanitized = name
		.chars()
		.map(|c| {
			if c.is_control() || INVALID_FILE_NAME_CHARS.contains(&c) {
				'_'
			} else {
				c
			}
		})
		.collect::<String>();

	let trimmed = sanitized.trim().trim_end_matches(['.', ' ']);

	if trimmed.is_empty() {
		"untitled".to_string()
	} else {
		trimmed.to_string()
	}
}
