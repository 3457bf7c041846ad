use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    Overview,
    ImageClassifier,
    Embeddings,
    Chat,
    Onnx,
    Capabilities,
}

impl Route {
    /// Sidebar order.
    pub const ALL: [Route; 6] = [
        Route::Overview,
        Route::ImageClassifier,
        Route::Embeddings,
        Route::Chat,
        Route::Onnx,
        Route::Capabilities,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Route::Overview => "/",
            Route::ImageClassifier => "/image-classifier",
            Route::Embeddings => "/embeddings",
            Route::Chat => "/webllm",
            Route::Onnx => "/onnx",
            Route::Capabilities => "/capabilities",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Route::Overview => "Overview",
            Route::ImageClassifier => "Image Classifier",
            Route::Embeddings => "Embeddings Search",
            Route::Chat => "Chat",
            Route::Onnx => "ONNX Runtime",
            Route::Capabilities => "Capabilities",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for Route {
    type Err = String;

    /// Accepts a path with or without the leading slash.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_end_matches('/');
        let wanted = wanted.strip_prefix('/').unwrap_or(wanted);
        Route::ALL
            .into_iter()
            .find(|route| route.path().trim_start_matches('/') == wanted)
            .ok_or_else(|| format!("unknown route: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub route: Route,
    pub path: &'static str,
    pub label: &'static str,
}

pub fn nav_items() -> Vec<NavItem> {
    Route::ALL
        .into_iter()
        .map(|route| NavItem {
            route,
            path: route.path(),
            label: route.label(),
        })
        .collect()
}

/// A card on the overview page linking to one demo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DemoTile {
    pub title: &'static str,
    pub description: &'static str,
    pub route: Route,
}

pub const DEMO_TILES: [DemoTile; 5] = [
    DemoTile {
        title: "Image Classification",
        description: "Run MobileNetV4 through ONNX Runtime on the GPU when one is available, with automatic CPU fallback.",
        route: Route::ImageClassifier,
    },
    DemoTile {
        title: "Embeddings & Search",
        description: "Embed a small corpus locally and rank it against a query with cosine similarity.",
        route: Route::Embeddings,
    },
    DemoTile {
        title: "Streaming Chat",
        description: "Stream completions from a local OpenAI-compatible server token by token.",
        route: Route::Chat,
    },
    DemoTile {
        title: "ONNX Runtime Control",
        description: "Bind session outputs to device memory and time a single inference without readbacks.",
        route: Route::Onnx,
    },
    DemoTile {
        title: "Capability Playground",
        description: "Inspect adapter features such as shader-f16, the compute limits, and cross-origin isolation in one place.",
        route: Route::Capabilities,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_round_trip() {
        for route in Route::ALL {
            assert_eq!(route.path().parse::<Route>(), Ok(route));
        }
        assert_eq!("webllm".parse::<Route>(), Ok(Route::Chat));
        assert_eq!("/onnx/".parse::<Route>(), Ok(Route::Onnx));
        assert_eq!("".parse::<Route>(), Ok(Route::Overview));
        assert!("/settings".parse::<Route>().is_err());
    }

    #[test]
    fn sidebar_lists_six_routes_in_order() {
        let labels: Vec<_> = nav_items().iter().map(|item| item.label).collect();
        assert_eq!(
            labels,
            [
                "Overview",
                "Image Classifier",
                "Embeddings Search",
                "Chat",
                "ONNX Runtime",
                "Capabilities"
            ]
        );
    }

    #[test]
    fn every_demo_has_a_tile() {
        let tiled: Vec<_> = DEMO_TILES.iter().map(|t| t.route).collect();
        assert_eq!(tiled, &Route::ALL[1..]);
    }
}
