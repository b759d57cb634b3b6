use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tera::{Context, Tera};

use crate::db::models::Reading;

pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

const INDEX_TEMPLATE_NAME: &str = "index.html";

// `time` is built from a formatted chrono value only, so it is marked safe to
// keep the slashes unescaped.
const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8">
        <title>Sensor Data</title>
        <style>body { font-family: sans-serif; }</style>
    </head>
    <body>
        <h1>Sensor Data</h1>
        <button onclick="window.location.reload()">Refresh</button>
        <table border="1">
            <thead>
                <tr>
                    <th>Time</th>
                    <th>Temperature</th>
                    <th>Humidity</th>
                    <th>Pressure</th>
                </tr>
            </thead>
            <tbody>
{%- for row in rows %}
                <tr><td>{{ row.time | safe }}</td><td>{{ row.temperature }}</td><td>{{ row.humidity }}</td><td>{{ row.pressure }}</td></tr>
{%- endfor %}
            </tbody>
        </table>
    </body>
</html>
"#;

#[derive(Serialize)]
struct RowView {
    time: String,
    temperature: String,
    humidity: String,
    pressure: String,
}

/// Renders the readings page. The template is compiled once at startup.
pub struct PageRenderer {
    tera: Tera,
    utc_timestamps: bool,
}

impl PageRenderer {
    pub fn new(utc_timestamps: bool) -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template(INDEX_TEMPLATE_NAME, INDEX_TEMPLATE)?;
        Ok(Self {
            tera,
            utc_timestamps,
        })
    }

    pub fn format_timestamp(&self, timestamp: &DateTime<Utc>) -> String {
        if self.utc_timestamps {
            timestamp.format(TIMESTAMP_FORMAT).to_string()
        } else {
            timestamp
                .with_timezone(&Local)
                .format(TIMESTAMP_FORMAT)
                .to_string()
        }
    }

    /// One table row per reading, in the order given.
    pub fn render(&self, readings: &[Reading]) -> Result<String, tera::Error> {
        let rows: Vec<RowView> = readings
            .iter()
            .map(|r| RowView {
                time: self.format_timestamp(&r.timestamp),
                temperature: r.temperature.to_string(),
                humidity: r.humidity.to_string(),
                pressure: r.pressure.to_string(),
            })
            .collect();

        let mut context = Context::new();
        context.insert("rows", &rows);
        self.tera.render(INDEX_TEMPLATE_NAME, &context)
    }
}
