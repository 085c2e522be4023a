//! Server-rendered upload page

use crate::handler::UploadResponse;

/// Everything the page can show after a submit
#[derive(Debug, Default)]
pub struct PageView<'a> {
    pub result: Option<&'a UploadResponse>,
    pub error: Option<&'a str>,
}

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Image Analysis</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: flex-start;
            justify-content: center;
            padding: 20px;
        }
        .container {
            background: white;
            border-radius: 20px;
            box-shadow: 0 20px 60px rgba(0,0,0,0.3);
            max-width: 900px;
            width: 100%;
            padding: 40px;
        }
        h1 { color: #333; margin-bottom: 10px; font-size: 2em; }
        .subtitle { color: #666; margin-bottom: 30px; font-size: 0.9em; }
        .upload-area {
            border: 3px dashed #667eea;
            border-radius: 15px;
            padding: 30px 20px;
            text-align: center;
            background: #f8f9ff;
        }
        .upload-area input[type="file"] { margin-bottom: 15px; }
        button {
            background: #667eea;
            color: white;
            border: none;
            border-radius: 10px;
            padding: 10px 24px;
            font-size: 1em;
            font-weight: 600;
            cursor: pointer;
        }
        button:hover { background: #764ba2; }
        .error {
            background: #fee;
            border: 2px solid #fcc;
            color: #c33;
            padding: 15px;
            border-radius: 10px;
            margin-top: 20px;
        }
        .result { margin-top: 30px; }
        .result-label {
            color: #667eea;
            font-size: 0.85em;
            font-weight: 600;
            text-transform: uppercase;
            letter-spacing: 1px;
            margin: 20px 0 8px;
        }
        .result-text { color: #333; font-size: 1.2em; line-height: 1.6; }
        .tags { display: flex; gap: 8px; flex-wrap: wrap; list-style: none; }
        .tags li {
            background: #f8f9ff;
            color: #667eea;
            padding: 6px 14px;
            border-radius: 20px;
            font-size: 0.85em;
            font-weight: 600;
            border: 2px solid #667eea;
        }
        .annotated { max-width: 100%; border-radius: 10px; box-shadow: 0 4px 15px rgba(0,0,0,0.1); }
    </style>
</head>
<body>
    <div class="container">
        <h1>Image Analysis</h1>
        <p class="subtitle">Caption, tags and detected objects</p>
        <form class="upload-area" method="post" action="/" enctype="multipart/form-data">
            <input type="file" name="imageFile" accept="image/*">
            <br>
            <button type="submit">Analyze</button>
        </form>
"#;

const PAGE_TAIL: &str = r#"    </div>
</body>
</html>
"#;

/// Escape text for use inside HTML element content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_page(view: &PageView<'_>) -> String {
    let mut html = String::from(PAGE_HEAD);

    if let Some(error) = view.error {
        html.push_str(&format!(
            "        <div class=\"error\">{}</div>\n",
            escape_html(error)
        ));
    }

    if let Some(result) = view.result {
        html.push_str("        <div class=\"result\">\n");
        html.push_str("            <div class=\"result-label\">Caption</div>\n");
        html.push_str(&format!(
            "            <div class=\"result-text\" id=\"caption\">{}</div>\n",
            escape_html(&result.caption)
        ));

        html.push_str("            <div class=\"result-label\">Tags</div>\n");
        html.push_str("            <ul class=\"tags\" id=\"tags\">\n");
        for tag in &result.tags {
            html.push_str(&format!("                <li>{}</li>\n", escape_html(tag)));
        }
        html.push_str("            </ul>\n");

        if !result.text.is_empty() {
            html.push_str("            <div class=\"result-label\">Text</div>\n");
            html.push_str(&format!(
                "            <pre class=\"result-text\" id=\"text\">{}</pre>\n",
                escape_html(&result.text.join("\n"))
            ));
        }

        html.push_str("            <div class=\"result-label\">Detected objects</div>\n");
        html.push_str(&format!(
            "            <img class=\"annotated\" id=\"thumbnailImage\" alt=\"Annotated image\" src=\"data:image/png;base64,{}\">\n",
            result.thumbnail_image
        ));
        html.push_str("        </div>\n");
    }

    html.push_str(PAGE_TAIL);
    html
}
