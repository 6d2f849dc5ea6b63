// Render session: a plot plus its lazily fit scale cache

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::aes::Channel;
use crate::error::Result;
use crate::ir::SceneGraph;
use crate::plot::{self, FittedChannel, Plot};

/// Cache state of one channel's scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleState {
    Unfit,
    Fit,
    /// Fit against inputs that have since changed; refit on next render.
    Stale,
}

#[derive(Debug, Clone)]
enum Entry {
    Fit { fingerprint: u64, fitted: FittedChannel },
    Stale,
}

/// Fitted scales keyed by channel, each tagged with a fingerprint of the
/// inputs it was fit from.
#[derive(Debug, Clone, Default)]
pub struct ScaleCache {
    entries: BTreeMap<Channel, Entry>,
    fits: usize,
}

impl ScaleCache {
    pub fn state(&self, channel: Channel) -> ScaleState {
        match self.entries.get(&channel) {
            None => ScaleState::Unfit,
            Some(Entry::Fit { .. }) => ScaleState::Fit,
            Some(Entry::Stale) => ScaleState::Stale,
        }
    }

    /// Number of channel fits performed so far.
    pub fn fits(&self) -> usize {
        self.fits
    }

    pub(crate) fn get_or_fit(
        &mut self,
        channel: Channel,
        fingerprint: u64,
        fit: impl FnOnce() -> Result<FittedChannel>,
    ) -> Result<FittedChannel> {
        if let Some(Entry::Fit { fingerprint: fp, fitted }) = self.entries.get(&channel) {
            if *fp == fingerprint {
                tracing::trace!("{} scale: cache hit", channel);
                return Ok(fitted.clone());
            }
        }
        let fitted = fit()?;
        self.fits += 1;
        self.entries.insert(channel, Entry::Fit { fingerprint, fitted: fitted.clone() });
        Ok(fitted)
    }

    /// Mark every fit channel whose inputs differ in `plot` as stale.
    pub(crate) fn invalidate(&mut self, plot: &Plot) {
        for (channel, entry) in self.entries.iter_mut() {
            if let Entry::Fit { fingerprint: fp, .. } = entry {
                if *fp != fingerprint(plot, *channel) {
                    tracing::debug!("{} scale is stale", channel);
                    *entry = Entry::Stale;
                }
            }
        }
    }
}

/// Hash of everything a channel's fitted scales depend on: the identity of
/// every dataset, all layer mappings and stats, the facet spec, the channel's
/// scale override and the pipeline options. Moves and the theme are excluded;
/// they act after fitting.
pub(crate) fn fingerprint(plot: &Plot, channel: Channel) -> u64 {
    let mut hasher = DefaultHasher::new();
    (Arc::as_ptr(plot.data()) as usize).hash(&mut hasher);
    format!("{:?}", plot.defaults()).hash(&mut hasher);
    for layer in plot.layers() {
        layer.data.as_ref().map(|d| Arc::as_ptr(d) as usize).hash(&mut hasher);
        format!(
            "{:?}|{:?}|{:?}|{:?}|{}",
            layer.aes, layer.stat, layer.mark, layer.orient, layer.inherit
        )
        .hash(&mut hasher);
    }
    format!("{:?}", plot.facet_spec()).hash(&mut hasher);
    format!("{:?}", plot.scale_specs().get(&channel)).hash(&mut hasher);
    format!("{:?}", plot.pipeline_options()).hash(&mut hasher);
    hasher.finish()
}

/// Owns a plot across edits and reuses fitted scales between renders until
/// something they were fit from changes.
#[derive(Debug, Clone)]
pub struct Session {
    plot: Plot,
    cache: ScaleCache,
}

impl Session {
    pub fn new(plot: Plot) -> Self {
        Session { plot, cache: ScaleCache::default() }
    }

    pub fn plot(&self) -> &Plot {
        &self.plot
    }

    /// Replace the plot with an edited version of itself.
    pub fn update(&mut self, edit: impl FnOnce(&Plot) -> Plot) {
        let next = edit(&self.plot);
        self.cache.invalidate(&next);
        self.plot = next;
    }

    pub fn render(&mut self) -> Result<SceneGraph> {
        plot::run(&self.plot, Some(&mut self.cache))
    }

    pub fn state(&self, channel: Channel) -> ScaleState {
        self.cache.state(channel)
    }

    pub fn fits(&self) -> usize {
        self.cache.fits()
    }
}
