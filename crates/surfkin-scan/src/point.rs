use surfkin_params::{GridIndex, Overlay};

/// One resolved grid point handed to an inner-job factory.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    /// Generator index of the point.
    pub index: GridIndex,
    /// Overrides layered on the reference settings.
    pub overlay: Overlay,
    /// Workdir label unique within the scan.
    pub label: String,
}

impl ScanPoint {
    /// Point labelled `<prefix>/point_<i>[_<j>...]`.
    pub fn new(prefix: &str, index: GridIndex, overlay: Overlay) -> Self {
        let label = format!("{prefix}/{}", point_label(&index));
        Self {
            index,
            overlay,
            label,
        }
    }
}

/// Filesystem-safe name of a grid index.
pub fn point_label(index: &GridIndex) -> String {
    let parts: Vec<String> = index.positions().iter().map(|p| p.to_string()).collect();
    format!("point_{}", parts.join("_"))
}
