//! File sets used across tests

use previewkit_common::FileRecord;

pub const DEV_SERVER_PORT: u16 = 5173;

/// `package.json` with a `dev` script plus an entry document
pub fn vite_project() -> Vec<FileRecord> {
    vec![
        FileRecord::new(
            "package.json",
            r#"{
  "name": "todo-app",
  "scripts": { "dev": "vite", "build": "vite build" },
  "dependencies": { "react": "^18.2.0", "react-dom": "^18.2.0" },
  "devDependencies": { "vite": "^5.0.0", "@vitejs/plugin-react": "^4.2.0" }
}"#,
        ),
        FileRecord::new(
            "index.html",
            r#"<!doctype html><html><body><div id="root"></div><script type="module" src="/src/main.jsx"></script></body></html>"#,
        ),
        FileRecord::new("src/main.jsx", "import App from './App.jsx'"),
        FileRecord::new("src/App.jsx", "export default function App() { return <h1>Todos</h1> }"),
    ]
}

/// A manifest without a `dev` script
pub fn scriptless_project() -> Vec<FileRecord> {
    vec![
        FileRecord::new("package.json", r#"{"name":"bare","dependencies":{"vite":"^5.0.0"}}"#),
        FileRecord::new("index.html", "<html><body></body></html>"),
    ]
}

pub fn static_site() -> Vec<FileRecord> {
    vec![FileRecord::new("index.html", "<html><body>Hi</body></html>")]
}

/// Expo app with no browser-runnable subproject
pub fn native_only_project() -> Vec<FileRecord> {
    vec![
        FileRecord::new("app.json", r#"{"expo":{"name":"demo","slug":"demo"}}"#),
        FileRecord::new(
            "App.js",
            "import { View, Text } from 'react-native';\nexport default function App() { return <View><Text>hi</Text></View> }",
        ),
    ]
}

/// Expo app that ships a browser preview under `web/`
pub fn native_with_web_preview() -> Vec<FileRecord> {
    let mut files = native_only_project();
    files.extend(vite_project().into_iter().map(|f| FileRecord::new(format!("web/{}", f.path), f.content)));
    files
}
