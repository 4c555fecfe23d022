use serde::Serialize;

/// 1+ .. 6 with tendencies, mapped onto the 15..0 point domain.
pub const TENDENCY_SCALE_ID: &str = "noten_1_6";
/// Raw upper-school points 15..0.
pub const POINTS_SCALE_ID: &str = "punkte_15_0";

pub const MAX_POINT_VALUE: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleStep {
    pub label: &'static str,
    pub points: u8,
}

const fn step(label: &'static str, points: u8) -> ScaleStep {
    ScaleStep { label, points }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScale {
    pub id: &'static str,
    pub name: &'static str,
    pub steps: &'static [ScaleStep],
}

static TENDENCY_STEPS: [ScaleStep; 16] = [
    step("1+", 15),
    step("1", 14),
    step("1-", 13),
    step("2+", 12),
    step("2", 11),
    step("2-", 10),
    step("3+", 9),
    step("3", 8),
    step("3-", 7),
    step("4+", 6),
    step("4", 5),
    step("4-", 4),
    step("5+", 3),
    step("5", 2),
    step("5-", 1),
    step("6", 0),
];

static POINTS_STEPS: [ScaleStep; 16] = [
    step("15", 15),
    step("14", 14),
    step("13", 13),
    step("12", 12),
    step("11", 11),
    step("10", 10),
    step("9", 9),
    step("8", 8),
    step("7", 7),
    step("6", 6),
    step("5", 5),
    step("4", 4),
    step("3", 3),
    step("2", 2),
    step("1", 1),
    step("0", 0),
];

static BUILTIN_SCALES: [GradingScale; 2] = [
    GradingScale {
        id: TENDENCY_SCALE_ID,
        name: "Noten 1+ bis 6",
        steps: &TENDENCY_STEPS,
    },
    GradingScale {
        id: POINTS_SCALE_ID,
        name: "Punkte 15 bis 0",
        steps: &POINTS_STEPS,
    },
];

pub fn builtin_scales() -> &'static [GradingScale] {
    &BUILTIN_SCALES
}

pub fn find_scale(id: &str) -> Option<&'static GradingScale> {
    BUILTIN_SCALES.iter().find(|s| s.id == id)
}

/// Scale used to read grade labels when a group names an unknown scale id.
pub fn fallback_scale() -> &'static GradingScale {
    &BUILTIN_SCALES[1]
}

pub fn resolve_scale(id: &str) -> &'static GradingScale {
    match find_scale(id) {
        Some(s) => s,
        None => {
            tracing::warn!(scale_id = id, "unknown grading scale, reading labels as points");
            fallback_scale()
        }
    }
}

impl GradingScale {
    pub fn label_for(&self, points: i64) -> Option<&'static str> {
        self.steps
            .iter()
            .find(|s| i64::from(s.points) == points)
            .map(|s| s.label)
    }

    pub fn points_for(&self, label: &str) -> Option<u8> {
        let t = label.trim();
        self.steps.iter().find(|s| s.label == t).map(|s| s.points)
    }
}
