//! Per-region visual state driven by query results and user selection.
//!
//! Every rendered region is DEFAULT, HIGHLIGHTED or SELECTED. At most one
//! code is SELECTED, and a highlight pass never overwrites it.

use crate::data::{CountryDataset, CountryRecord};
use crate::executor::QueryResult;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub mod headless;

pub use headless::HeadlessMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegionCategory {
    #[default]
    Default,
    Selected,
    Highlighted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStyle {
    pub fill_color: &'static str,
    pub fill_opacity: f32,
    pub weight: f32,
    pub color: &'static str,
}

const PALETTE: &[&str] = &[
    "#cbd5e1", "#d6d3d1", "#d1d5db", "#e2e8f0", "#e7e5e4", "#dbeafe", "#dcfce7", "#fef9c3",
];

impl RegionStyle {
    pub const HIGHLIGHTED: RegionStyle = RegionStyle {
        fill_color: "#f59e0b",
        fill_opacity: 1.0,
        weight: 2.0,
        color: "#d97706",
    };

    pub const SELECTED: RegionStyle = RegionStyle {
        fill_color: "#0ea5e9",
        fill_opacity: 1.0,
        weight: 2.5,
        color: "#0369a1",
    };

    /// Resting style; the fill is a stable pastel picked from the code.
    pub fn default_for(code: Option<&str>) -> RegionStyle {
        let hash = code
            .unwrap_or_default()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        RegionStyle {
            fill_color: PALETTE[hash as usize % PALETTE.len()],
            fill_opacity: 0.85,
            weight: 1.2,
            color: "#475569",
        }
    }

    pub fn for_category(category: RegionCategory, code: Option<&str>) -> RegionStyle {
        match category {
            RegionCategory::Default => Self::default_for(code),
            RegionCategory::Selected => Self::SELECTED,
            RegionCategory::Highlighted => Self::HIGHLIGHTED,
        }
    }
}

/// Geographic box, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            south: self.south.min(other.south),
            west: self.west.min(other.west),
            north: self.north.max(other.north),
            east: self.east.max(other.east),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    /// Pixels, (x, y)
    pub padding: (u32, u32),
    pub max_zoom: u8,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            padding: (50, 50),
            max_zoom: 5,
        }
    }
}

/// What the map renderer has to offer.
pub trait MapSurface {
    type Region: Clone;

    fn regions(&self) -> Vec<Self::Region>;

    /// ISO_A3 of the region, if the geometry carries one.
    fn region_code(&self, region: &Self::Region) -> Option<String>;

    fn set_region_style(&mut self, region: &Self::Region, style: RegionStyle);

    fn region_bounds(&self, region: &Self::Region) -> Option<Bounds>;

    fn bring_region_to_front(&mut self, region: &Self::Region);

    fn fit_to_bounds(&mut self, bounds: Bounds, options: FitOptions);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange {
    Selected(String),
    Deselected(String),
    /// Unknown code or no map attached
    Ignored,
}

/// Owns the region state map. Single writer, no locking.
pub struct HighlightMap<S: MapSurface> {
    surface: Option<S>,
    categories: HashMap<String, RegionCategory>,
    highlighted: HashSet<String>,
    selected: Option<String>,
    info_panel: Option<CountryRecord>,
}

impl<S: MapSurface> Default for HighlightMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MapSurface> HighlightMap<S> {
    /// A map with no surface yet; highlight passes count 0 until `attach`.
    pub fn new() -> Self {
        Self {
            surface: None,
            categories: HashMap::new(),
            highlighted: HashSet::new(),
            selected: None,
            info_panel: None,
        }
    }

    /// Installs the surface and paints every region in its resting style.
    pub fn attach(&mut self, mut surface: S) {
        for region in surface.regions() {
            let code = surface.region_code(&region);
            surface.set_region_style(&region, RegionStyle::default_for(code.as_deref()));
        }
        self.surface = Some(surface);
        self.categories.clear();
        self.highlighted.clear();
        self.selected = None;
        self.info_panel = None;
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    pub fn category(&self, code: &str) -> RegionCategory {
        self.categories.get(code).copied().unwrap_or_default()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Record shown for the selected region.
    pub fn info_panel(&self) -> Option<&CountryRecord> {
        self.info_panel.as_ref()
    }

    pub fn highlighted_codes(&self) -> &HashSet<String> {
        &self.highlighted
    }

    /// Highlights the regions whose code appears in `result` and in `dataset`.
    ///
    /// Returns how many distinct rendered codes ended up highlighted, counting a
    /// SELECTED one that matched. 0 when no surface is attached.
    pub fn apply_highlight(&mut self, result: &QueryResult, dataset: &CountryDataset) -> usize {
        let Some(surface) = self.surface.as_mut() else {
            debug!("Map not attached, skipping highlight");
            return 0;
        };

        let matched: HashSet<String> = result
            .codes()
            .filter(|code| dataset.contains(code))
            .map(str::to_string)
            .collect();

        let mut counted: HashSet<String> = HashSet::new();
        for region in surface.regions() {
            let code = surface.region_code(&region);
            let category = match code.as_deref() {
                Some(c) if matched.contains(c) => {
                    counted.insert(c.to_string());
                    if self.selected.as_deref() == Some(c) {
                        continue;
                    }
                    RegionCategory::Highlighted
                }
                Some(c) if self.selected.as_deref() == Some(c) => continue,
                _ => RegionCategory::Default,
            };

            surface.set_region_style(&region, RegionStyle::for_category(category, code.as_deref()));
            if let Some(c) = code {
                self.categories.insert(c, category);
            }
        }

        debug!(
            matched = matched.len(),
            highlighted = counted.len(),
            "Highlight pass applied"
        );
        self.highlighted = matched;
        counted.len()
    }

    /// Every region back to its resting style; clears highlight, selection and
    /// the info panel.
    pub fn reset_map(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            for region in surface.regions() {
                let code = surface.region_code(&region);
                surface.set_region_style(&region, RegionStyle::default_for(code.as_deref()));
            }
        }
        self.categories.clear();
        self.highlighted.clear();
        self.selected = None;
        self.info_panel = None;
    }

    /// Toggles selection of `code`. The previously selected region falls back
    /// to HIGHLIGHTED when it still matches the last result, else DEFAULT.
    pub fn select_region(&mut self, code: &str, dataset: &CountryDataset) -> SelectionChange {
        let Some(record) = dataset.get(code) else {
            debug!("Ignoring selection of unknown code {}", code);
            return SelectionChange::Ignored;
        };
        if self.surface.is_none() {
            return SelectionChange::Ignored;
        }

        if self.selected.as_deref() == Some(code) {
            self.selected = None;
            self.info_panel = None;
            self.revert(code);
            return SelectionChange::Deselected(code.to_string());
        }

        if let Some(previous) = self.selected.take() {
            self.revert(&previous);
        }

        self.restyle(code, RegionCategory::Selected, true);
        self.selected = Some(code.to_string());
        self.info_panel = Some(record.clone());
        SelectionChange::Selected(code.to_string())
    }

    /// Zooms to the regions of `code` and raises them. False when none is rendered.
    pub fn focus_region(&mut self, code: &str) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };

        let regions: Vec<S::Region> = surface
            .regions()
            .into_iter()
            .filter(|r| surface.region_code(r).as_deref() == Some(code))
            .collect();
        if regions.is_empty() {
            return false;
        }

        let bounds = regions
            .iter()
            .filter_map(|r| surface.region_bounds(r))
            .reduce(|acc, b| acc.union(&b));
        if let Some(bounds) = bounds {
            surface.fit_to_bounds(bounds, FitOptions::default());
        }
        for region in &regions {
            surface.bring_region_to_front(region);
        }
        true
    }

    fn revert(&mut self, code: &str) {
        let category = if self.highlighted.contains(code) {
            RegionCategory::Highlighted
        } else {
            RegionCategory::Default
        };
        self.restyle(code, category, false);
    }

    fn restyle(&mut self, code: &str, category: RegionCategory, to_front: bool) {
        if let Some(surface) = self.surface.as_mut() {
            for region in surface.regions() {
                if surface.region_code(&region).as_deref() != Some(code) {
                    continue;
                }
                surface.set_region_style(&region, RegionStyle::for_category(category, Some(code)));
                if to_front {
                    surface.bring_region_to_front(&region);
                }
            }
        }
        self.categories.insert(code.to_string(), category);
    }
}
