// =============================================================================
// Board page — the HTML shell that keeps reloading the chart image
// =============================================================================

/// HTML page showing `/chart.svg`, re-requested every `refresh_ms` with a
/// cache-busting query so each reload runs a fresh poll cycle.
pub fn index_html(title: &str, refresh_ms: u64) -> String {
    let refresh_ms = refresh_ms.max(100);
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
  html, body {{ margin: 0; background: #ffffff; }}
  #chart {{ display: block; width: 100vw; height: 100vh; object-fit: contain; }}
</style>
</head>
<body>
<img id="chart" src="/chart.svg" alt="{title}">
<script>
  const chart = document.getElementById("chart");
  setInterval(() => {{
    chart.src = "/chart.svg?t=" + Date.now();
  }}, {refresh_ms});
</script>
</body>
</html>
"#
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
