//! Single-page status dashboard. Plain HTML, data pulled from the JSON API.

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>MeetBridge</title>
<style>
  body { font-family: -apple-system, system-ui, sans-serif; margin: 2rem auto; max-width: 960px; color: #222; }
  h1 { font-size: 1.4rem; }
  .cards { display: grid; grid-template-columns: repeat(auto-fill, minmax(150px, 1fr)); gap: .75rem; }
  .card { border: 1px solid #ddd; border-radius: 6px; padding: .75rem; }
  .card b { display: block; font-size: 1.5rem; }
  table { width: 100%; border-collapse: collapse; margin-top: 1.5rem; }
  td, th { text-align: left; padding: .4rem; border-bottom: 1px solid #eee; font-size: .9rem; }
  .extraction_failed, .delivery_failed { color: #dc3545; }
  .extracted, .delivered { color: #28a745; }
  form { margin-top: 1.5rem; display: grid; gap: .5rem; }
  textarea { min-height: 8rem; }
</style>
</head>
<body>
<h1>MeetBridge</h1>
<div class="cards" id="stats"></div>
<p><button id="redrive">Process unprocessed</button> <span id="redrive-result"></span></p>
<table>
  <thead><tr><th>Meeting</th><th>Status</th><th>First seen</th></tr></thead>
  <tbody id="meetings"></tbody>
</table>
<table>
  <thead><tr><th>Retry</th><th>Attempts</th><th>Next</th><th>Last error</th><th></th></tr></thead>
  <tbody id="retries"></tbody>
</table>
<form id="upload">
  <input name="title" placeholder="Meeting title">
  <textarea name="transcript" placeholder="Paste a transcript"></textarea>
  <button type="submit">Upload</button>
</form>
<script>
const LABELS = {
  total_records: "Meetings", records_today: "Today", records_this_week: "This week",
  extraction_failed: "Extraction failed", items_total: "Action items", items_delivered: "Cards created",
  items_failed: "Delivery failed", retries_pending: "Retries pending", unprocessed: "Unprocessed"
};
function text(tag, value, cls) {
  const el = document.createElement(tag);
  el.textContent = value;
  if (cls) el.className = cls;
  return el;
}
async function refresh() {
  const stats = await (await fetch("/api/v1/stats")).json();
  const cards = document.getElementById("stats");
  cards.replaceChildren();
  if (stats.ok) {
    for (const [key, label] of Object.entries(LABELS)) {
      const card = text("div", label, "card");
      card.prepend(text("b", stats.stats[key]));
      cards.append(card);
    }
  }
  const list = await (await fetch("/api/v1/meetings?limit=25")).json();
  const rows = document.getElementById("meetings");
  rows.replaceChildren();
  for (const m of list.meetings || []) {
    const tr = document.createElement("tr");
    tr.append(text("td", m.title), text("td", m.status, m.status), text("td", m.first_seen_at));
    rows.append(tr);
  }
  const queue = await (await fetch("/api/v1/retries")).json();
  const retries = document.getElementById("retries");
  retries.replaceChildren();
  for (const r of queue.retries || []) {
    const tr = document.createElement("tr");
    const actions = document.createElement("td");
    for (const [label, action] of [["Retry now", "retry"], ["Delete", "delete"]]) {
      const button = text("button", label);
      button.disabled = r.in_flight;
      button.onclick = async () => {
        const res = await (await fetch(`/api/v1/retries/${r.id}/${action}`, { method: "POST" })).json();
        if (!res.ok) alert(res.error);
        refresh();
      };
      actions.append(button);
    }
    tr.append(text("td", r.kind), text("td", r.attempt_count), text("td", r.next_eligible_at),
      text("td", r.last_error), actions);
    retries.append(tr);
  }
}
document.getElementById("redrive").onclick = async () => {
  const res = await (await fetch("/api/v1/process-unprocessed", { method: "POST" })).json();
  document.getElementById("redrive-result").textContent = res.ok ? `${res.queued} queued` : res.error;
  refresh();
};
document.getElementById("upload").onsubmit = async (ev) => {
  ev.preventDefault();
  const form = new FormData(ev.target);
  const res = await (await fetch("/api/v1/upload", {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ title: form.get("title"), transcript: form.get("transcript") })
  })).json();
  if (!res.ok) alert(res.error);
  ev.target.reset();
  refresh();
};
refresh();
setInterval(refresh, 10000);
</script>
</body>
</html>
"#;

pub fn dashboard_html() -> &'static str {
    DASHBOARD_HTML
}
