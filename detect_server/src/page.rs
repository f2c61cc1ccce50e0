//! The single page of the UI.
//!
//! The page posts commands as JSON and polls `/status` for the running state and notices. The
//! display region is an `<img>` fed by the multipart `/stream` endpoint.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>YOLO 11n Object Detection</title>
<style>
  body { margin: 0; font-family: sans-serif; display: flex; min-height: 100vh; }
  aside { width: 280px; padding: 1rem; background: #f0f2f6; box-sizing: border-box; }
  aside label, aside select, aside input, aside button { display: block; width: 100%; margin: 0.4rem 0; }
  aside input[type=checkbox] { display: inline; width: auto; }
  main { flex: 1; padding: 1rem; }
  main img { max-width: 100%; background: #202020; }
  .notice { padding: 0.5rem; margin: 0.3rem 0; border-radius: 4px; }
  .info { background: #dbe9f6; }
  .success { background: #d7f0dc; }
  .warning { background: #fbf1cf; }
  .error { background: #f9d9d9; }
  #busy { display: none; font-style: italic; }
</style>
</head>
<body>
<aside>
  <h2>Settings</h2>
  <label><input type="checkbox" id="optimized"> Use optimized model</label>
  <button id="export">Optimize for device (export to NNEF)</button>
  <div id="busy">Exporting model...</div>
  <hr>
  <label for="source_kind">Video source</label>
  <select id="source_kind">
    <option value="webcam">Webcam</option>
    <option value="network_stream">Network stream</option>
    <option value="pi_camera">Pi camera</option>
  </select>
  <div id="webcam_opts">
    <label for="webcam_index">Webcam index</label>
    <input type="number" id="webcam_index" value="0" min="0">
  </div>
  <div id="stream_opts" hidden>
    <label for="stream_url">Stream URL</label>
    <input type="text" id="stream_url" placeholder="http://host:port/video">
  </div>
  <button id="start">Start</button>
  <button id="stop">Stop</button>
</aside>
<main>
  <h1>YOLO 11n Object Detection</h1>
  <div id="notices"></div>
  <img src="/stream" alt="Detection output">
</main>
<script>
  const el = (id) => document.getElementById(id);

  function render(status) {
    el("start").disabled = status.running;
    el("stop").disabled = !status.running;
    el("notices").replaceChildren(...status.notices.map((n) => {
      const div = document.createElement("div");
      div.className = "notice " + n.level;
      div.textContent = n.text;
      return div;
    }));
  }

  async function post(path, body) {
    const response = await fetch(path, {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify(body || {}),
    });
    render(await response.json());
  }

  async function poll() {
    try {
      render(await (await fetch("/status")).json());
    } catch (e) {
      console.warn("status poll failed", e);
    }
  }

  el("source_kind").addEventListener("change", () => {
    const kind = el("source_kind").value;
    el("webcam_opts").hidden = kind !== "webcam";
    el("stream_opts").hidden = kind !== "network_stream";
  });

  el("start").addEventListener("click", () => {
    const request = {
      source_kind: el("source_kind").value,
      optimized: el("optimized").checked,
    };
    if (request.source_kind === "webcam") {
      request.webcam_index = parseInt(el("webcam_index").value || "0", 10);
    } else if (request.source_kind === "network_stream") {
      request.stream_url = el("stream_url").value;
    }
    post("/start", request);
  });

  el("stop").addEventListener("click", () => post("/stop"));

  el("export").addEventListener("click", async () => {
    el("export").disabled = true;
    el("busy").style.display = "block";
    try {
      await post("/export");
    } finally {
      el("export").disabled = false;
      el("busy").style.display = "none";
    }
  });

  poll();
  setInterval(poll, 1000);
</script>
</body>
</html>
"#;
