use super::{Bounds, FitOptions, MapSurface, RegionStyle};

#[derive(Debug, Clone)]
struct HeadlessRegion {
    code: Option<String>,
    bounds: Bounds,
    style: Option<RegionStyle>,
}

/// In-memory map surface. Records styles, z-order and the last viewport fit.
#[derive(Debug, Clone, Default)]
pub struct HeadlessMap {
    regions: Vec<HeadlessRegion>,
    z_order: Vec<usize>,
    last_fit: Option<(Bounds, FitOptions)>,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// One region per code, laid out on a 10 degree grid.
    pub fn from_codes<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = Self::new();
        for (i, code) in codes.into_iter().enumerate() {
            let west = (i % 36) as f64 * 10.0 - 180.0;
            let south = (i / 36 % 18) as f64 * 10.0 - 90.0;
            map.add_region(Some(code), Bounds::new(south, west, south + 10.0, west + 10.0));
        }
        map
    }

    pub fn add_region(&mut self, code: Option<&str>, bounds: Bounds) -> usize {
        self.regions.push(HeadlessRegion {
            code: code.map(str::to_string),
            bounds,
            style: None,
        });
        let idx = self.regions.len() - 1;
        self.z_order.push(idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Style of the first region carrying `code`.
    pub fn style_of(&self, code: &str) -> Option<RegionStyle> {
        self.regions
            .iter()
            .find(|r| r.code.as_deref() == Some(code))
            .and_then(|r| r.style)
    }

    /// Code of the top region.
    pub fn front_most(&self) -> Option<&str> {
        self.z_order
            .last()
            .and_then(|idx| self.regions[*idx].code.as_deref())
    }

    pub fn last_fit(&self) -> Option<(Bounds, FitOptions)> {
        self.last_fit
    }
}

impl MapSurface for HeadlessMap {
    type Region = usize;

    fn regions(&self) -> Vec<usize> {
        (0..self.regions.len()).collect()
    }

    fn region_code(&self, region: &usize) -> Option<String> {
        self.regions.get(*region).and_then(|r| r.code.clone())
    }

    fn set_region_style(&mut self, region: &usize, style: RegionStyle) {
        if let Some(r) = self.regions.get_mut(*region) {
            r.style = Some(style);
        }
    }

    fn region_bounds(&self, region: &usize) -> Option<Bounds> {
        self.regions.get(*region).map(|r| r.bounds)
    }

    fn bring_region_to_front(&mut self, region: &usize) {
        if let Some(pos) = self.z_order.iter().position(|idx| idx == region) {
            let idx = self.z_order.remove(pos);
            self.z_order.push(idx);
        }
    }

    fn fit_to_bounds(&mut self, bounds: Bounds, options: FitOptions) {
        self.last_fit = Some((bounds, options));
    }
}
