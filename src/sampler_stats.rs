use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleStatValue {
    U64(u64),
    F64(f64),
    Bool(bool),
}

impl From<u64> for SampleStatValue {
    fn from(val: u64) -> Self {
        SampleStatValue::U64(val)
    }
}

impl From<f64> for SampleStatValue {
    fn from(val: f64) -> Self {
        SampleStatValue::F64(val)
    }
}

impl From<bool> for SampleStatValue {
    fn from(val: bool) -> Self {
        SampleStatValue::Bool(val)
    }
}

pub trait AsSampleStatMap {
    fn as_map(&self) -> HashMap<&'static str, SampleStatValue>;
}

/// Diagnostic information about one draw of a chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NutsSampleStats {
    pub draw: u64,
    pub tuning: bool,
    pub depth: u64,
    pub maxdepth_reached: bool,
    pub n_steps: u64,
    pub divergences: u64,
    pub logp: f64,
    pub mean_tree_accept: f64,
    pub step_size: f64,
    pub step_size_bar: f64,
}

impl NutsSampleStats {
    pub fn diverging(&self) -> bool {
        self.divergences > 0
    }
}

impl AsSampleStatMap for NutsSampleStats {
    fn as_map(&self) -> HashMap<&'static str, SampleStatValue> {
        let mut map: HashMap<_, SampleStatValue> = HashMap::with_capacity(12);
        map.insert("draw", self.draw.into());
        map.insert("tuning", self.tuning.into());
        map.insert("depth", self.depth.into());
        map.insert("maxdepth_reached", self.maxdepth_reached.into());
        map.insert("n_steps", self.n_steps.into());
        map.insert("divergences", self.divergences.into());
        map.insert("diverging", self.diverging().into());
        map.insert("logp", self.logp.into());
        map.insert("mean_tree_accept", self.mean_tree_accept.into());
        map.insert("step_size", self.step_size.into());
        map.insert("step_size_bar", self.step_size_bar.into());
        map
    }
}
