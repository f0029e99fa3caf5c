//! Metrics registry for the observer.
//!
//! Counters and histograms with dynamic label tuples backed by `DashMap`.
//! Label values are stored in schema order; rendering sorts instruments by
//! name and series by label tuple so scrapes are deterministic. Instruments
//! without any series are left out of a render.
//!
//! Counter series accumulate lock-free in an `AtomicU64`. Histogram series
//! keep buckets, sum and count behind one short `Mutex` so a render never
//! sees them out of step.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use hitmeter_core::error::{HitmeterError, Result};

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Format a float the way the exposition format expects (`1` not `1.0`).
fn fmt_float(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 {
            "+Inf".into()
        } else {
            "-Inf".into()
        }
    } else if v.is_nan() {
        "NaN".into()
    } else {
        format!("{v}")
    }
}

/// Check bucket bounds: non-empty, finite, strictly ascending. A trailing
/// `+Inf` is implicit and dropped.
pub fn normalize_buckets(bounds: &[f64]) -> Result<Vec<f64>> {
    let mut out: Vec<f64> = bounds.to_vec();
    if out.last().is_some_and(|b| *b == f64::INFINITY) {
        out.pop();
    }
    if out.is_empty() {
        return Err(HitmeterError::InvalidBuckets(
            "at least one finite bound is required".into(),
        ));
    }
    if let Some(b) = out.iter().find(|b| !b.is_finite()) {
        return Err(HitmeterError::InvalidBuckets(format!("bound {b} is not finite")));
    }
    for w in out.windows(2) {
        if w[0] >= w[1] {
            return Err(HitmeterError::InvalidBuckets(format!(
                "bounds must be strictly ascending ({} >= {})",
                w[0], w[1]
            )));
        }
    }
    Ok(out)
}

/// Counters stick at `u64::MAX` instead of wrapping.
fn saturating_add(counter: &AtomicU64, v: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
        Some(cur.saturating_add(v))
    });
}

/// Name, help and label schema shared by every instrument kind.
#[derive(Debug, Clone)]
struct Desc {
    name: String,
    help: String,
    labels: Vec<String>,
}

impl Desc {
    fn new(name: &str, help: &str, labels: &[&str]) -> Result<Self> {
        if !valid_metric_name(name) {
            return Err(HitmeterError::InvalidName(format!("metric name {name:?}")));
        }
        for l in labels {
            if !valid_label_name(l) {
                return Err(HitmeterError::InvalidName(format!("label {l:?} on {name}")));
            }
        }
        for (i, l) in labels.iter().enumerate() {
            if labels[..i].contains(l) {
                return Err(HitmeterError::InvalidName(format!("label {l:?} repeated on {name}")));
            }
        }
        Ok(Self {
            name: name.to_string(),
            help: help.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        })
    }

    fn key(&self, values: &[&str]) -> Result<Vec<String>> {
        if values.len() != self.labels.len() {
            return Err(HitmeterError::LabelArity {
                metric: self.name.clone(),
                expected: self.labels.len(),
                got: values.len(),
            });
        }
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    fn header(&self, kind: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, escape_help(&self.help));
        let _ = writeln!(out, "# TYPE {} {}", self.name, kind);
    }

    /// `a="x",b="y"` for one tuple, without braces.
    fn label_pairs(&self, values: &[String]) -> String {
        self.labels
            .iter()
            .zip(values)
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn braced(pairs: &str) -> String {
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{pairs}}}")
    }
}

#[derive(Debug)]
pub struct CounterVec {
    desc: Desc,
    map: DashMap<Vec<String>, AtomicU64>,
}

impl CounterVec {
    fn new(desc: Desc) -> Self {
        Self { desc, map: DashMap::new() }
    }

    /// Increment by 1.
    pub fn inc(&self, labels: &[&str]) -> Result<()> {
        self.add(labels, 1)
    }

    /// Increment by an arbitrary value. The series is created on first use.
    pub fn add(&self, labels: &[&str], v: u64) -> Result<()> {
        let key = self.desc.key(labels)?;
        if let Some(counter) = self.map.get(&key) {
            saturating_add(&counter, v);
            return Ok(());
        }
        let counter = self.map.entry(key).or_insert_with(|| AtomicU64::new(0));
        saturating_add(&counter, v);
        Ok(())
    }

    pub fn get(&self, labels: &[&str]) -> Option<u64> {
        let key = self.desc.key(labels).ok()?;
        self.map.get(&key).map(|c| c.load(Ordering::Relaxed))
    }

    fn snapshot(&self) -> Vec<(Vec<String>, u64)> {
        let mut rows: Vec<_> = self
            .map
            .iter()
            .map(|r| (r.key().clone(), r.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, out: &mut String) {
        let rows = self.snapshot();
        if rows.is_empty() {
            return;
        }
        self.desc.header("counter", out);
        for (key, val) in rows {
            let labels = braced(&self.desc.label_pairs(&key));
            let _ = writeln!(out, "{}{} {}", self.desc.name, labels, val);
        }
    }
}

/// Point-in-time view of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// Cumulative count per declared bound, same order as the bounds.
    pub buckets: Vec<u64>,
    pub sum: f64,
    /// Total observations (the implicit `+Inf` bucket).
    pub count: u64,
}

#[derive(Debug)]
pub struct HistogramVec {
    desc: Desc,
    bounds: Vec<f64>,
    map: DashMap<Vec<String>, Mutex<HistogramSnapshot>>,
}

impl HistogramVec {
    fn new(desc: Desc, bounds: Vec<f64>) -> Self {
        Self { desc, bounds, map: DashMap::new() }
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    fn empty(&self) -> Mutex<HistogramSnapshot> {
        Mutex::new(HistogramSnapshot {
            buckets: vec![0; self.bounds.len()],
            sum: 0.0,
            count: 0,
        })
    }

    /// Observe a value and increment cumulative buckets.
    pub fn observe(&self, labels: &[&str], value: f64) -> Result<()> {
        let key = self.desc.key(labels)?;
        if let Some(entry) = self.map.get(&key) {
            self.record(&entry, value);
            return Ok(());
        }
        let entry = self.map.entry(key).or_insert_with(|| self.empty());
        self.record(&entry, value);
        Ok(())
    }

    fn record(&self, cell: &Mutex<HistogramSnapshot>, value: f64) {
        let mut hist = cell.lock().unwrap_or_else(|e| e.into_inner());

        hist.count += 1;
        hist.sum += value;

        // Cumulative buckets: every bound at or above the value moves.
        for (i, &b) in self.bounds.iter().enumerate() {
            if value <= b {
                hist.buckets[i] += 1;
            }
        }
    }

    pub fn get(&self, labels: &[&str]) -> Option<HistogramSnapshot> {
        let key = self.desc.key(labels).ok()?;
        let entry = self.map.get(&key)?;
        let hist = entry.lock().unwrap_or_else(|e| e.into_inner());
        Some(hist.clone())
    }

    fn snapshot(&self) -> Vec<(Vec<String>, HistogramSnapshot)> {
        let mut rows: Vec<_> = self
            .map
            .iter()
            .map(|r| {
                let hist = r.value().lock().unwrap_or_else(|e| e.into_inner());
                (r.key().clone(), hist.clone())
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Render in Prometheus text exposition format.
    fn render(&self, out: &mut String) {
        let rows = self.snapshot();
        if rows.is_empty() {
            return;
        }
        let name = &self.desc.name;
        self.desc.header("histogram", out);
        for (key, hist) in rows {
            let label_str = self.desc.label_pairs(&key);
            let prefix = if label_str.is_empty() {
                String::new()
            } else {
                format!("{label_str},")
            };

            for (le, count) in self.bounds.iter().zip(&hist.buckets) {
                let le = fmt_float(*le);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, hist.count);

            let labels = braced(&label_str);
            let _ = writeln!(out, "{}_sum{} {}", name, labels, fmt_float(hist.sum));
            let _ = writeln!(out, "{}_count{} {}", name, labels, hist.count);
        }
    }
}

/// One registered instrument.
#[derive(Clone)]
pub enum Instrument {
    Counter(Arc<CounterVec>),
    Histogram(Arc<HistogramVec>),
}

impl Instrument {
    fn render(&self, out: &mut String) {
        match self {
            Instrument::Counter(c) => c.render(out),
            Instrument::Histogram(h) => h.render(out),
        }
    }
}

/// Explicit registry value owned by one exposition endpoint. Nothing here is
/// process-wide: independent endpoints use independent registries.
#[derive(Default)]
pub struct MetricRegistry {
    instruments: RwLock<BTreeMap<String, Instrument>>,
    closed: AtomicBool,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HitmeterError::RegistryClosed);
        }
        Ok(())
    }

    fn register(&self, name: &str, instrument: Instrument) -> Result<()> {
        let mut map = self.instruments.write().unwrap_or_else(|e| e.into_inner());
        // Checked under the write lock so a concurrent close cannot slip in.
        self.ensure_open()?;
        if map.contains_key(name) {
            return Err(HitmeterError::DuplicateMetric(name.to_string()));
        }
        map.insert(name.to_string(), instrument);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Instrument> {
        self.ensure_open()?;
        let map = self.instruments.read().unwrap_or_else(|e| e.into_inner());
        map.get(name)
            .cloned()
            .ok_or_else(|| HitmeterError::UnknownMetric(name.to_string()))
    }

    pub fn create_counter(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<CounterVec>> {
        let counter = Arc::new(CounterVec::new(Desc::new(name, help, labels)?));
        self.register(name, Instrument::Counter(Arc::clone(&counter)))?;
        Ok(counter)
    }

    pub fn create_histogram(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
        bounds: &[f64],
    ) -> Result<Arc<HistogramVec>> {
        let desc = Desc::new(name, help, labels)?;
        if labels.contains(&"le") {
            return Err(HitmeterError::InvalidName(format!(
                "label \"le\" is reserved on histogram {name}"
            )));
        }
        let hist = Arc::new(HistogramVec::new(desc, normalize_buckets(bounds)?));
        self.register(name, Instrument::Histogram(Arc::clone(&hist)))?;
        Ok(hist)
    }

    pub fn counter(&self, name: &str) -> Result<Arc<CounterVec>> {
        match self.lookup(name)? {
            Instrument::Counter(c) => Ok(c),
            Instrument::Histogram(_) => Err(HitmeterError::UnknownMetric(format!(
                "{name} (not a counter)"
            ))),
        }
    }

    pub fn histogram(&self, name: &str) -> Result<Arc<HistogramVec>> {
        match self.lookup(name)? {
            Instrument::Histogram(h) => Ok(h),
            Instrument::Counter(_) => Err(HitmeterError::UnknownMetric(format!(
                "{name} (not a histogram)"
            ))),
        }
    }

    pub fn increment_counter(&self, name: &str, labels: &[&str], delta: u64) -> Result<()> {
        self.counter(name)?.add(labels, delta)
    }

    pub fn observe_histogram(&self, name: &str, labels: &[&str], value: f64) -> Result<()> {
        self.histogram(name)?.observe(labels, value)
    }

    pub fn counter_value(&self, name: &str, labels: &[&str]) -> Option<u64> {
        self.counter(name).ok()?.get(labels)
    }

    pub fn histogram_snapshot(&self, name: &str, labels: &[&str]) -> Option<HistogramSnapshot> {
        self.histogram(name).ok()?.get(labels)
    }

    pub fn metric_names(&self) -> Vec<String> {
        let map = self.instruments.read().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }

    /// Render every instrument. The instrument map lock is only held while
    /// the handles are copied out; each instrument is then snapshotted on
    /// its own.
    pub fn render(&self) -> Result<String> {
        self.ensure_open()?;
        let instruments: Vec<Instrument> = {
            let map = self.instruments.read().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        let mut out = String::new();
        for i in &instruments {
            i.render(&mut out);
        }
        Ok(out)
    }

    /// Drop every instrument and refuse further use. Idempotent.
    pub fn unregister_all(&self) {
        let mut map = self.instruments.write().unwrap_or_else(|e| e.into_inner());
        self.closed.store(true, Ordering::Release);
        map.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
