//! Metric catalog
//!
//! The single table of known metric keys and their polarity. Every
//! component interprets "better" and "worse" through this catalog, so the
//! table is built once and shared behind an `Arc`.

use std::collections::HashMap;

/// Metrics shown in visualisations and considered for insights, in display order.
pub const CORE_METRICS: &[&str] = &[
    "score",
    "firstContentfulPaint",
    "largestContentfulPaint",
    "cumulativeLayoutShift",
    "totalBlockingTime",
    "speedIndex",
];

/// Key of the metric used to derive a site's overall competitive position.
pub const POSITION_METRIC: &str = "score";

const GENERAL_ACTIONS: &[&str] = &[
    "Audit the pages behind this metric with a lab measurement run",
    "Compare recent deployments against the date the change started",
    "Set a performance budget and alert when it is exceeded",
];

/// Static description of one metric.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    pub key: &'static str,
    pub display_name: &'static str,
    pub higher_is_better: bool,
    pub unit: &'static str,
    pub actions: &'static [&'static str],
}

const STANDARD_METRICS: &[MetricDefinition] = &[
    MetricDefinition {
        key: "score",
        display_name: "Performance Score",
        higher_is_better: true,
        unit: "points",
        actions: &[
            "Address the largest opportunities listed in the latest audit",
            "Defer non-critical JavaScript and CSS",
            "Serve static assets from a CDN with long cache lifetimes",
        ],
    },
    MetricDefinition {
        key: "accessibility",
        display_name: "Accessibility Score",
        higher_is_better: true,
        unit: "points",
        actions: &[
            "Add alternative text to images and labels to form controls",
            "Raise text contrast to meet WCAG AA",
            "Ensure interactive elements are reachable by keyboard",
        ],
    },
    MetricDefinition {
        key: "bestPractices",
        display_name: "Best Practices Score",
        higher_is_better: true,
        unit: "points",
        actions: &[
            "Serve every resource over HTTPS",
            "Remove deprecated APIs and console errors",
            "Update third-party libraries with known vulnerabilities",
        ],
    },
    MetricDefinition {
        key: "seo",
        display_name: "SEO Score",
        higher_is_better: true,
        unit: "points",
        actions: &[
            "Provide unique titles and meta descriptions for every page",
            "Fix crawl errors and broken internal links",
            "Add structured data for key content types",
        ],
    },
    MetricDefinition {
        key: "firstContentfulPaint",
        display_name: "First Contentful Paint",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Eliminate render-blocking resources",
            "Inline critical CSS",
            "Reduce server response time",
        ],
    },
    MetricDefinition {
        key: "largestContentfulPaint",
        display_name: "Largest Contentful Paint",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Optimize and compress hero images",
            "Preload the largest contentful paint resource",
            "Reduce server response time",
            "Remove render-blocking resources above the fold",
        ],
    },
    MetricDefinition {
        key: "cumulativeLayoutShift",
        display_name: "Cumulative Layout Shift",
        higher_is_better: false,
        unit: "",
        actions: &[
            "Set explicit width and height on images and embeds",
            "Reserve space for ads and late-loading content",
            "Avoid inserting content above existing content",
        ],
    },
    MetricDefinition {
        key: "totalBlockingTime",
        display_name: "Total Blocking Time",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Break up long main-thread tasks",
            "Reduce JavaScript execution time",
            "Defer or remove unused third-party scripts",
        ],
    },
    MetricDefinition {
        key: "speedIndex",
        display_name: "Speed Index",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Minimize main-thread work during load",
            "Optimize web font loading",
            "Prioritize above-the-fold content",
        ],
    },
    MetricDefinition {
        key: "timeToInteractive",
        display_name: "Time to Interactive",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Reduce JavaScript payloads with code splitting",
            "Defer non-essential scripts until after load",
        ],
    },
    MetricDefinition {
        key: "interactionToNextPaint",
        display_name: "Interaction to Next Paint",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Shorten event handlers and yield to the main thread",
            "Avoid large rendering updates after input",
        ],
    },
    MetricDefinition {
        key: "serverResponseTime",
        display_name: "Server Response Time",
        higher_is_better: false,
        unit: "ms",
        actions: &[
            "Enable server-side caching",
            "Optimize slow database queries",
            "Move the origin closer to users or add a CDN",
        ],
    },
    MetricDefinition {
        key: "totalByteWeight",
        display_name: "Total Page Size",
        higher_is_better: false,
        unit: "bytes",
        actions: &[
            "Compress text resources with gzip or brotli",
            "Serve images in modern formats",
            "Remove unused JavaScript and CSS",
        ],
    },
    MetricDefinition {
        key: "requestCount",
        display_name: "Request Count",
        higher_is_better: false,
        unit: "requests",
        actions: &[
            "Bundle small scripts and stylesheets",
            "Lazy-load below-the-fold images",
            "Remove unused third-party tags",
        ],
    },
    MetricDefinition {
        key: "domSize",
        display_name: "DOM Size",
        higher_is_better: false,
        unit: "elements",
        actions: &[
            "Paginate or virtualize long lists",
            "Simplify deeply nested markup",
        ],
    },
];

/// Lookup table for metric polarity, display names and canned actions.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    definitions: HashMap<&'static str, MetricDefinition>,
}

impl MetricCatalog {
    /// Catalog of the standard performance and SEO metrics.
    pub fn standard() -> Self {
        let definitions = STANDARD_METRICS
            .iter()
            .map(|d| (d.key, d.clone()))
            .collect();
        Self { definitions }
    }

    pub fn definition(&self, key: &str) -> Option<&MetricDefinition> {
        self.definitions.get(key)
    }

    /// Whether larger values are improvements. Unknown metrics are
    /// treated as lower-is-better.
    pub fn higher_is_better(&self, key: &str) -> bool {
        self.definition(key).map(|d| d.higher_is_better).unwrap_or(false)
    }

    /// Human-readable name; unknown metrics fall back to their key.
    pub fn display_name(&self, key: &str) -> String {
        self.definition(key)
            .map(|d| d.display_name.to_string())
            .unwrap_or_else(|| key.to_string())
    }

    pub fn unit(&self, key: &str) -> &'static str {
        self.definition(key).map(|d| d.unit).unwrap_or("")
    }

    /// Canned remediation steps for a metric.
    pub fn recommended_actions(&self, key: &str) -> Vec<String> {
        self.definition(key)
            .map(|d| d.actions)
            .unwrap_or(GENERAL_ACTIONS)
            .iter()
            .map(|a| a.to_string())
            .collect()
    }

    pub fn is_core(&self, key: &str) -> bool {
        CORE_METRICS.contains(&key)
    }

    /// Default metrics tracked in reports.
    pub fn core_metrics(&self) -> Vec<String> {
        CORE_METRICS.iter().map(|k| k.to_string()).collect()
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
