//! Known-good project skeletons used as the install fallback.
//!
//! When dependency installation fails, the manifest and build config are
//! replaced with a minimal set for the same framework family, and missing
//! entry files are filled in. User source files are left alone.

use crate::detect::{join_path, Manifest};
use crate::mount::files_under;
use previewkit_common::FileRecord;
use serde_json::json;

/// Framework family of a manifest-driven project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    React,
    Vue,
    Svelte,
    Vanilla,
}

impl Framework {
    /// Infer the family from manifest dependencies, falling back to source extensions
    pub fn detect(manifest: Option<&Manifest>, sources: &[&str]) -> Self {
        if let Some(m) = manifest {
            if m.depends_on("react") || m.depends_on("preact") {
                return Framework::React;
            }
            if m.depends_on("vue") {
                return Framework::Vue;
            }
            if m.depends_on("svelte") {
                return Framework::Svelte;
            }
        }
        if sources.iter().any(|p| p.ends_with(".jsx") || p.ends_with(".tsx")) {
            Framework::React
        } else if sources.iter().any(|p| p.ends_with(".vue")) {
            Framework::Vue
        } else if sources.iter().any(|p| p.ends_with(".svelte")) {
            Framework::Svelte
        } else {
            Framework::Vanilla
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Svelte => "svelte",
            Framework::Vanilla => "vanilla",
        }
    }
}

/// Replacement records (paths include `working_dir`) to merge over the file set
pub fn skeleton_files(files: &[FileRecord], working_dir: &str) -> (Framework, Vec<FileRecord>) {
    let scoped = files_under(files, working_dir);
    let sources: Vec<&str> = scoped.iter().map(|(p, _)| p.as_str()).collect();
    let manifest = scoped
        .iter()
        .rev()
        .find(|(p, _)| p == "package.json")
        .and_then(|(_, f)| Manifest::parse(&f.content));

    let framework = Framework::detect(manifest.as_ref(), &sources);
    let typescript = sources.iter().any(|p| p.ends_with(".ts") || p.ends_with(".tsx"))
        || manifest.as_ref().is_some_and(|m| m.depends_on("typescript"));
    let name = manifest
        .as_ref()
        .and_then(|m| m.name.clone())
        .unwrap_or_else(|| "preview-app".to_string());

    let exists = |path: &str| sources.iter().any(|p| *p == path);
    let mut out = vec![
        FileRecord::new(join_path(working_dir, "package.json"), package_json(&name, framework)),
        FileRecord::new(join_path(working_dir, "vite.config.js"), vite_config(framework)),
    ];

    let entry = entry_path(framework, typescript);
    if !exists("index.html") {
        out.push(FileRecord::new(
            join_path(working_dir, "index.html"),
            index_html(&name, &entry),
        ));
        if !exists(entry.as_str()) {
            let has_app = |ext: &str| exists(format!("src/App.{}", ext).as_str());
            let main = entry_source(
                framework,
                has_app("jsx") || has_app("tsx"),
                has_app("vue"),
                has_app("svelte"),
            );
            out.push(FileRecord::new(join_path(working_dir, &entry), main));
        }
    }

    (framework, out)
}

fn entry_path(framework: Framework, typescript: bool) -> String {
    let ext = match (framework, typescript) {
        (Framework::React, true) => "tsx",
        (Framework::React, false) => "jsx",
        (_, true) => "ts",
        (_, false) => "js",
    };
    format!("src/main.{}", ext)
}

fn package_json(name: &str, framework: Framework) -> String {
    let (dependencies, dev_dependencies) = match framework {
        Framework::React => (
            json!({ "react": "^18.2.0", "react-dom": "^18.2.0" }),
            json!({ "vite": "^5.0.0", "@vitejs/plugin-react": "^4.2.0" }),
        ),
        Framework::Vue => (
            json!({ "vue": "^3.4.0" }),
            json!({ "vite": "^5.0.0", "@vitejs/plugin-vue": "^5.0.0" }),
        ),
        Framework::Svelte => (
            json!({}),
            json!({ "vite": "^5.0.0", "svelte": "^4.2.0", "@sveltejs/vite-plugin-svelte": "^3.0.0" }),
        ),
        Framework::Vanilla => (json!({}), json!({ "vite": "^5.0.0" })),
    };

    let manifest = json!({
        "name": name,
        "private": true,
        "version": "0.0.0",
        "type": "module",
        "scripts": {
            "dev": "vite --host",
            "build": "vite build",
            "preview": "vite preview"
        },
        "dependencies": dependencies,
        "devDependencies": dev_dependencies,
    });
    // serde_json::Value always serializes
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}

fn vite_config(framework: Framework) -> String {
    let (import, plugin) = match framework {
        Framework::React => ("import react from '@vitejs/plugin-react';\n", "react()"),
        Framework::Vue => ("import vue from '@vitejs/plugin-vue';\n", "vue()"),
        Framework::Svelte => (
            "import { svelte } from '@sveltejs/vite-plugin-svelte';\n",
            "svelte()",
        ),
        Framework::Vanilla => ("", ""),
    };
    format!(
        r#"import {{ defineConfig }} from 'vite';
{import}
export default defineConfig({{
  plugins: [{plugin}],
  server: {{ host: true }},
}});
"#
    )
}

fn index_html(title: &str, entry: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>{title}</title>
  </head>
  <body>
    <div id="root"></div>
    <div id="app"></div>
    <script type="module" src="/{entry}"></script>
  </body>
</html>
"#
    )
}

fn entry_source(
    framework: Framework,
    react_app: bool,
    vue_app: bool,
    svelte_app: bool,
) -> &'static str {
    match framework {
        Framework::React if react_app => {
            r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App';

ReactDOM.createRoot(document.getElementById('root')).render(<App />);
"#
        }
        Framework::React => {
            r#"import React from 'react';
import ReactDOM from 'react-dom/client';

ReactDOM.createRoot(document.getElementById('root')).render(<p>Preview</p>);
"#
        }
        Framework::Vue if vue_app => {
            r#"import { createApp } from 'vue';
import App from './App.vue';

createApp(App).mount('#app');
"#
        }
        Framework::Svelte if svelte_app => {
            r#"import App from './App.svelte';

export default new App({ target: document.getElementById('app') });
"#
        }
        _ => {
            r#"document.getElementById('app').textContent = 'Preview';
"#
        }
    }
}
