//! Minijinja rendering of change reports.
//!
//! The HTML part comes in two variants: with a new-cities section when the
//! report names new cities, without it otherwise. Template names end in
//! `.html` so minijinja escapes page-derived values.

use iadw_core::ChangeReport;
use minijinja::{context, Environment};

use crate::traits::{Notification, NotifyError};

pub const ALERT_SUBJECT: &str = "New InsideAirBnB data available!";

const TEXT_TEMPLATE: &str = "\
Hello,
There are new files available for download on the InsideAirBnB site.
{% for count in report.file_counts -%}
- {{ count.country }} / {{ count.city }}: {{ count.files_added }} new file(s)
{% endfor -%}
{% if report.new_cities %}New cities: {{ report.new_cities | join(\", \") }}
{% endif -%}
Have a look:
{{ page_url }}
";

const COUNTS_BLOCK: &str = r#"    <p>Here are the number of new files per country/city:</p>
    <table>
      <tr><th>Country</th><th>City</th><th>New files</th></tr>
      {%- for count in report.file_counts %}
      <tr><td>{{ count.country }}</td><td>{{ count.city }}</td><td>{{ count.files_added }}</td></tr>
      {%- endfor %}
    </table>
    <p>Here are the new files added since the last update:</p>
    <table>
      <tr><th>Country</th><th>Region</th><th>City</th><th>Last update</th><th>Source</th></tr>
      {%- for file in report.new_files %}
      <tr><td>{{ file.country }}</td><td>{{ file.region }}</td><td>{{ file.city }}</td><td>{{ file.last_update }}</td><td><a href="{{ file.source_url }}">{{ file.source_url }}</a></td></tr>
      {%- endfor %}
    </table>
"#;

const HTML_TEMPLATE: &str = r#"<html>
  <body>
    <p>Hello,<br><br>
      There are new files available for download on the <a href="{{ page_url }}">InsideAirBnB site</a>.
    </p>
{% include "counts.html" %}
  </body>
</html>
"#;

const HTML_NEW_CITIES_TEMPLATE: &str = r#"<html>
  <body>
    <p>Hello,<br><br>
      There are new files available for download on the <a href="{{ page_url }}">InsideAirBnB site</a>.
    </p>
    <p>Here are the new cities added since the last update:</p>
    <ul>
      {%- for city in report.new_cities %}
      <li>{{ city }}</li>
      {%- endfor %}
    </ul>
{% include "counts.html" %}
  </body>
</html>
"#;

fn environment() -> Result<Environment<'static>, NotifyError> {
    let mut env = Environment::new();
    for (name, source) in [
        ("alert.txt", TEXT_TEMPLATE),
        ("counts.html", COUNTS_BLOCK),
        ("alert.html", HTML_TEMPLATE),
        ("alert_new_cities.html", HTML_NEW_CITIES_TEMPLATE),
    ] {
        env.add_template(name, source)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
    }
    Ok(env)
}

fn render(env: &Environment<'_>, name: &str, ctx: &minijinja::Value) -> Result<String, NotifyError> {
    env.get_template(name)
        .and_then(|template| template.render(ctx))
        .map_err(|e| NotifyError::Template(format!("{name}: {e}")))
}

/// Render the alert for `report`; `page_url` is where readers can get the data.
pub fn render_notification(
    report: &ChangeReport,
    page_url: &str,
) -> Result<Notification, NotifyError> {
    let env = environment()?;
    let ctx = context! { report => report, page_url => page_url };

    let html_template = match report.new_cities {
        Some(_) => "alert_new_cities.html",
        None => "alert.html",
    };

    Ok(Notification {
        subject: ALERT_SUBJECT.to_string(),
        text: render(&env, "alert.txt", &ctx)?,
        html: render(&env, html_template, &ctx)?,
    })
}
