//! The approval center page, served inline from `GET /`.
//!
//! Plain HTML + vanilla JS, no build step. Talks to the JSON API with the
//! session cookie set by the page response, listens on the SSE stream, and
//! reconnects the stream with a short backoff when it drops.

pub const APPROVAL_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Warden Approval Center</title>
<style>
  :root { color-scheme: dark; }
  body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; margin: 0;
         background: #14171a; color: #e8eaed; }
  header { display: flex; align-items: baseline; gap: 16px; padding: 18px 24px;
           border-bottom: 1px solid #2a2f34; }
  header h1 { font-size: 18px; margin: 0; }
  #pending-count { color: #9aa0a6; font-size: 14px; }
  #conn { margin-left: auto; font-size: 12px; color: #9aa0a6; }
  #conn.live { color: #81c995; }
  main { max-width: 760px; margin: 0 auto; padding: 20px; }
  .hint { color: #9aa0a6; font-size: 13px; margin-bottom: 14px; }
  .card { background: #1c2126; border: 1px solid #2a2f34; border-left: 4px solid #5f6368;
          border-radius: 8px; padding: 14px 16px; margin-bottom: 12px; }
  .card.low { border-left-color: #81c995; }
  .card.medium { border-left-color: #fdd663; }
  .card.high { border-left-color: #f28b82; }
  .cmd { font-family: "SF Mono", Menlo, Consolas, monospace; font-size: 14px; }
  .meta { color: #9aa0a6; font-size: 12px; margin-top: 6px; }
  .factors { margin-top: 6px; font-size: 12px; color: #bdc1c6; }
  .actions { margin-top: 10px; display: flex; gap: 8px; }
  button { border: 0; border-radius: 6px; padding: 7px 14px; font-size: 13px;
           cursor: pointer; }
  .approve { background: #1e3a28; color: #81c995; }
  .reject { background: #3a1e1e; color: #f28b82; }
  .empty { text-align: center; color: #9aa0a6; padding: 48px 0; }
</style>
</head>
<body>
<header>
  <h1>Warden Approval Center</h1>
  <span id="pending-count">0 pending</span>
  <span id="conn">connecting&hellip;</span>
</header>
<main>
  <div class="hint">Press <b>A</b> to approve or <b>R</b> to reject the first request.</div>
  <div id="cards"></div>
  <div id="empty" class="empty">Nothing waiting for approval.</div>
</main>
<script>
  // The first hit carries ?token=...; the server already answered with a
  // session cookie, so drop the token from the visible URL and history.
  if (location.search.includes('token=')) {
    history.replaceState(null, '', location.pathname);
  }

  let requests = [];

  function render() {
    const cards = document.getElementById('cards');
    cards.innerHTML = '';
    for (const req of requests) {
      const card = document.createElement('div');
      card.className = 'card ' + req.risk_class;
      card.dataset.id = req.request_id;

      const cmd = document.createElement('div');
      cmd.className = 'cmd';
      cmd.textContent = req.command + ' ' + req.args.join(' ');
      card.appendChild(cmd);

      const meta = document.createElement('div');
      meta.className = 'meta';
      meta.textContent = 'in ' + req.working_directory + ' · risk ' + req.risk_score +
        ' (' + req.risk_class + ') · ' + new Date(req.submitted_at).toLocaleTimeString();
      card.appendChild(meta);

      if (req.risk_factors.length) {
        const factors = document.createElement('div');
        factors.className = 'factors';
        factors.textContent = req.risk_factors.join(' · ');
        card.appendChild(factors);
      }

      const actions = document.createElement('div');
      actions.className = 'actions';
      const ok = document.createElement('button');
      ok.className = 'approve';
      ok.textContent = 'Approve (A)';
      ok.onclick = () => decide(req.request_id, true);
      const no = document.createElement('button');
      no.className = 'reject';
      no.textContent = 'Reject (R)';
      no.onclick = () => decide(req.request_id, false);
      actions.appendChild(ok);
      actions.appendChild(no);
      card.appendChild(actions);

      cards.appendChild(card);
    }
    document.getElementById('pending-count').textContent = requests.length + ' pending';
    document.getElementById('empty').style.display = requests.length ? 'none' : 'block';
  }

  function removeRequest(id) {
    requests = requests.filter((r) => r.request_id !== id);
    render();
  }

  async function decide(id, approve) {
    const action = approve ? 'approve' : 'reject';
    const body = { decidedBy: 'approval-center' };
    if (!approve) {
      const reason = prompt('Reason for rejection (optional)') || undefined;
      if (reason) body.reason = reason;
    }
    const resp = await fetch('/api/requests/' + id + '/' + action, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body),
    });
    if (resp.ok) {
      // Do not wait for the next poll or SSE frame.
      removeRequest(id);
    }
  }

  async function refresh() {
    const resp = await fetch('/api/requests/pending');
    if (!resp.ok) return;
    const data = await resp.json();
    requests = data.requests;
    render();
  }

  document.addEventListener('keydown', (e) => {
    if (e.target.tagName === 'INPUT' || !requests.length) return;
    const key = e.key.toLowerCase();
    if (key === 'a') decide(requests[0].request_id, true);
    if (key === 'r') decide(requests[0].request_id, false);
  });

  let source = null;
  function connect() {
    source = new EventSource('/api/events');
    source.addEventListener('connected', () => {
      document.getElementById('conn').textContent = 'live';
      document.getElementById('conn').className = 'live';
    });
    source.addEventListener('initialData', (e) => {
      requests = JSON.parse(e.data).requests;
      render();
    });
    source.addEventListener('requestCreated', (e) => {
      const req = JSON.parse(e.data).request;
      if (!requests.some((r) => r.request_id === req.request_id)) {
        requests.push(req);
        render();
      }
    });
    source.addEventListener('requestDecided', (e) => {
      removeRequest(JSON.parse(e.data).request.request_id);
    });
    source.onerror = () => {
      document.getElementById('conn').textContent = 'reconnecting…';
      document.getElementById('conn').className = '';
      source.close();
      setTimeout(connect, 2000);
    };
  }

  refresh();
  connect();
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_carries_the_required_behaviours() {
        // The UI contract: counts, risk classes, A/R keys, immediate card
        // removal, SSE reconnect.
        assert!(APPROVAL_PAGE.contains("pending-count"));
        assert!(APPROVAL_PAGE.contains(".card.high"));
        assert!(APPROVAL_PAGE.contains("key === 'a'"));
        assert!(APPROVAL_PAGE.contains("key === 'r'"));
        assert!(APPROVAL_PAGE.contains("removeRequest"));
        assert!(APPROVAL_PAGE.contains("setTimeout(connect"));
        assert!(APPROVAL_PAGE.contains("EventSource"));
    }
}
