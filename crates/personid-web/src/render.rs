//! HTML for the upload form and the result view.

use personid_core::Report;
use std::fmt::Write;

const STYLES: &str = include_str!("../assets/styles.css");

/// A processed upload: its counts and where the annotated image is served.
pub struct ResultView<'a> {
    pub report: &'a Report,
    pub image_url: &'a str,
}

/// Render the page: the form, an optional message and an optional result section.
pub fn page(message: Option<&str>, result: Option<ResultView<'_>>) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str(concat!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n",
        "    <meta charset=\"UTF-8\">\n",
        "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        "    <title>Person Identifier</title>\n",
    ));
    let _ = writeln!(html, "    <style>\n{STYLES}    </style>");
    html.push_str("</head>\n<body>\n    <div class=\"container\">\n        <h1>Person Identifier</h1>\n");

    if let Some(message) = message {
        let _ = writeln!(html, "        <div class=\"message\">{}</div>", escape(message));
    }

    html.push_str(concat!(
        "        <form method=\"post\" enctype=\"multipart/form-data\">\n",
        "            <div class=\"form-group\">\n",
        "                <label for=\"file\">Upload Image:</label>\n",
        "                <input type=\"file\" name=\"file\" id=\"file\" accept=\"image/*\" required>\n",
        "            </div>\n",
        "            <button type=\"submit\">Upload and Identify</button>\n",
        "        </form>\n",
    ));

    if let Some(result) = result {
        write_result(&mut html, &result);
    }

    html.push_str("    </div>\n</body>\n</html>\n");
    html
}

fn write_result(html: &mut String, result: &ResultView<'_>) {
    let report = result.report;
    html.push_str("        <div class=\"result\">\n");
    html.push_str("            <h2>Processed Image</h2>\n");
    let _ = writeln!(
        html,
        "            <img src=\"{}\" alt=\"Processed Image\">",
        escape(result.image_url)
    );

    html.push_str("            <h2>Counts</h2>\n");
    for identity in &report.identities {
        let _ = writeln!(
            html,
            "            <p>Number of {}: {}</p>",
            escape(&identity.plural),
            identity.count
        );
    }

    html.push_str("            <h2>Decade Counts</h2>\n");
    for entry in &report.decades {
        let _ = writeln!(
            html,
            "            <p>Number of people from the {}: {}</p>",
            entry.decade, entry.count
        );
    }

    html.push_str("            <h2>Wikipedia Count</h2>\n");
    let _ = writeln!(
        html,
        "            <p>Number of people with Wikipedia articles: {}</p>",
        report.wikipedia
    );
    html.push_str("        </div>\n");
}

/// Escape text for an HTML element body or a double-quoted attribute.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
