use serde::{Deserialize, Serialize};

/// Replaces every occurrence of `pattern` in the document text with the values found in
/// `columns` of the current row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRule {
	pub pattern: String,
	pub columns: Vec<String>,
}

/// Region of interest picked when an image has to be cropped to fit a shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoiType {
	#[default]
	Center,
	Prominent,
	RuleOfThirds,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropType {
	#[default]
	Crop,
	Fit,
}

/// Fills the picture shape `shape_id` with the first usable image found in `columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRule {
	pub shape_id: u32,
	#[serde(default)]
	pub roi_type: RoiType,
	#[serde(default)]
	pub crop_type: CropType,
	pub columns: Vec<String>,
}
