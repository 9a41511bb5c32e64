use flate2::Compression as Level;
use flate2::write::GzEncoder;
use gecko_convert::ConverterConfig;
use gecko_convert::gecko_parse::{MarkerPhase, Profile};
use gecko_convert::loader::{Compression, decompress, load_profile};
use std::io::{Cursor, Write};

const RENDERER_TRACE: &str = r#"{
  "metadata": {"os-name": "Mac OS X", "startTime": "2025-03-01T08:30:00Z"},
  "traceEvents": [
    {"name": "process_name", "ph": "M", "pid": 10, "tid": 0, "cat": "__metadata", "args": {"name": "Renderer"}},
    {"name": "thread_name", "ph": "M", "pid": 10, "tid": 1, "cat": "__metadata", "args": {"name": "CrRendererMain"}},
    {"name": "thread_name", "ph": "M", "pid": 10, "tid": 2, "cat": "__metadata", "args": {"name": "Compositor"}},
    {"name": "TracingStartedInBrowser", "ph": "I", "ts": 1000000, "pid": 10, "tid": 1, "cat": "disabled-by-default-devtools.timeline", "s": "t"},
    {"name": "RunTask", "ph": "X", "ts": 1000100, "dur": 2500, "pid": 10, "tid": 1, "cat": "toplevel", "args": {}},
    {"name": "FunctionCall", "ph": "X", "ts": 1000200, "dur": 2000, "pid": 10, "tid": 1, "cat": "devtools.timeline,v8", "args": {"data": {"functionName": "onLoad"}}},
    {"name": "Layout", "ph": "X", "ts": 1002300, "dur": 150, "pid": 10, "tid": 1, "cat": "blink,devtools.timeline"},
    {"name": "DrawFrame", "ph": "I", "ts": 1003000, "pid": 10, "tid": 2, "cat": "cc,benchmark"},
    {"name": "navigationStart", "ph": "R", "ts": 1000050, "pid": 10, "tid": 1, "cat": "blink.user_timing"},
    {"name": "ThreadControllerImpl::RunTask", "ph": "B", "ts": 1000100, "pid": 10, "tid": 1, "cat": "toplevel"},
    {"name": "ThreadControllerImpl::RunTask", "ph": "E", "ts": 1000900, "pid": 10, "tid": 1, "cat": "toplevel"},
    {"name": "Profile", "ph": "P", "ts": 1000000, "pid": 10, "tid": 1, "id": "0x7", "cat": "disabled-by-default-v8.cpu_profiler",
     "args": {"data": {"startTime": 1000000}}},
    {"name": "ProfileChunk", "ph": "P", "ts": 1002000, "pid": 10, "tid": 3, "id": "0x7", "cat": "disabled-by-default-v8.cpu_profiler",
     "args": {"data": {
       "cpuProfile": {
         "nodes": [
           {"id": 1, "callFrame": {"functionName": "(root)", "scriptId": 0, "url": "", "lineNumber": -1, "columnNumber": -1, "codeType": "other"}},
           {"id": 2, "callFrame": {"functionName": "(program)", "scriptId": 0, "url": "", "lineNumber": -1, "columnNumber": -1, "codeType": "other"}, "parent": 1},
           {"id": 3, "callFrame": {"functionName": "onLoad", "scriptId": "12", "url": "https://example.com/app.js", "lineNumber": 41, "columnNumber": 7, "codeType": "JS"}, "parent": 1},
           {"id": 4, "callFrame": {"functionName": "", "scriptId": "12", "url": "https://example.com/app.js", "lineNumber": 50, "columnNumber": 3, "codeType": "JS"}, "parent": 3},
           {"id": 5, "callFrame": {"functionName": "observe", "scriptId": "40", "url": "chrome-extension://mnopqrstu/inject.js", "lineNumber": 2, "columnNumber": 0, "codeType": "JS"}, "parent": 3}
         ],
         "samples": [2, 3, 4, 4, 5, 3]
       },
       "timeDeltas": [250, 250, 250, 250, 250, 250]
     }}},
    {"name": "ProfileChunk", "ph": "P", "ts": 1003000, "pid": 10, "tid": 3, "id": "0x7", "cat": "disabled-by-default-v8.cpu_profiler",
     "args": {"data": {"cpuProfile": {"nodes": [], "samples": [4, 2]}, "timeDeltas": [250, 250]}}}
  ]
}"#;

fn load(json: &str) -> Profile {
    load_profile(Cursor::new(json), &ConverterConfig::default()).unwrap()
}

#[test]
fn renderer_trace_end_to_end() {
    let profile = load(RENDERER_TRACE);
    profile.validate().unwrap();

    assert_eq!(profile.meta.product, "Chrome");
    assert_eq!(profile.meta.platform.as_deref(), Some("Mac OS X"));
    assert_eq!(profile.meta.start_time, 1_740_817_800_000.0);
    assert_eq!(profile.meta.profiling_start_time, Some(0.0));
    assert_eq!(profile.meta.profiling_end_time, Some(3.0));

    let keys: Vec<_> = profile
        .threads
        .iter()
        .map(|thread| (thread.pid.as_str(), thread.tid, thread.name.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("10", 1, "CrRendererMain"),
            ("10", 2, "Compositor"),
            ("10", 3, "Thread 3"),
        ]
    );
    assert!(profile.threads.iter().all(|t| t.process_name.as_deref() == Some("Renderer")));
}

#[test]
fn markers_land_on_their_threads() {
    let profile = load(RENDERER_TRACE);

    let main = profile.thread("10", 1).unwrap();
    assert!(main.is_main_thread);

    // TracingStartedInBrowser, RunTask, FunctionCall, Layout, navigationStart.
    // Begin/end pairs are not turned into markers.
    assert_eq!(main.marker_count(), 5);

    let names: Vec<_> = main
        .markers
        .name
        .iter()
        .map(|&name| main.string(name).unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["TracingStartedInBrowser", "RunTask", "FunctionCall", "Layout", "navigationStart"]
    );

    assert_eq!(main.markers.start_time[1], Some(0.1));
    assert_eq!(main.markers.end_time[1], Some(2.6));
    assert!(main.markers.data[1].is_none());
    assert_eq!(
        main.markers.data[2].as_ref().unwrap()["data"]["functionName"],
        "onLoad"
    );
    assert_eq!(main.markers.phase[4], MarkerPhase::INSTANT);

    let category_names: Vec<_> = main
        .markers
        .category
        .iter()
        .map(|&c| profile.meta.categories[c].name.as_str())
        .collect();
    assert_eq!(
        category_names,
        vec!["Other", "Other", "Other", "Layout", "DOM"]
    );

    let compositor = profile.thread("10", 2).unwrap();
    assert_eq!(compositor.marker_count(), 1);
    assert_eq!(
        profile.meta.categories[compositor.markers.category[0]].name,
        "Graphics"
    );
}

#[test]
fn samples_land_on_the_session_thread() {
    let profile = load(RENDERER_TRACE);

    let main = profile.thread("10", 1).unwrap();
    let sampler = profile.thread("10", 3).unwrap();
    assert_eq!(main.sample_count(), 8);
    assert_eq!(sampler.sample_count(), 0);
    assert_eq!(sampler.stack_table.len(), 0);

    assert_eq!(
        main.samples.time,
        vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75]
    );
    assert!(main.samples.weight.iter().all(|&w| w == 1.0));

    let leaf_names: Vec<_> = main
        .samples
        .stack
        .iter()
        .map(|stack| {
            let frames = main.stack_frames(stack.unwrap());
            main.frame_func_name(frames[0]).unwrap()
        })
        .collect();
    assert_eq!(
        leaf_names,
        vec![
            "(program)",
            "onLoad",
            "(anonymous)",
            "(anonymous)",
            "observe",
            "onLoad",
            "(anonymous)",
            "(program)"
        ]
    );
}

#[test]
fn sampled_functions_carry_sources() {
    let profile = load(RENDERER_TRACE);
    let main = profile.thread("10", 1).unwrap();

    let on_load = main
        .func_table
        .name
        .iter()
        .position(|&name| main.string(name) == Some("onLoad"))
        .unwrap();
    assert!(main.func_table.is_js[on_load]);
    assert_eq!(main.func_table.line_number[on_load], Some(42));
    assert_eq!(main.func_table.column_number[on_load], Some(8));
    let file = main.func_table.file_name[on_load].unwrap();
    assert_eq!(main.string(file), Some("https://example.com/app.js"));

    let root = main
        .func_table
        .name
        .iter()
        .position(|&name| main.string(name) == Some("(root)"))
        .unwrap();
    assert!(!main.func_table.is_js[root]);
    assert_eq!(main.func_table.line_number[root], None);
    assert_eq!(main.func_table.resource[root], None);

    // Two scripts, two resources.
    assert_eq!(main.resource_table.len(), 2);

    assert_eq!(profile.meta.extensions.len(), 1);
    assert_eq!(profile.meta.extensions.id[0], "mnopqrstu");

    let app_js = main
        .string_array
        .iter()
        .filter(|s| *s == "https://example.com/app.js")
        .count();
    assert_eq!(app_js, 1);
}

#[test]
fn gzip_input_matches_plain_input() {
    let mut encoder = GzEncoder::new(Vec::new(), Level::default());
    encoder.write_all(RENDERER_TRACE.as_bytes()).unwrap();
    let bytes = encoder.finish().unwrap();

    let reader = decompress(Cursor::new(bytes), Compression::Gzip).unwrap();
    let compressed = load_profile(reader, &ConverterConfig::default()).unwrap();

    assert_eq!(compressed, load(RENDERER_TRACE));
}

#[test]
fn output_round_trips_through_the_parser() {
    let profile = load(RENDERER_TRACE);

    let mut output = Vec::new();
    profile.write_pretty(&mut output).unwrap();

    let reparsed = Profile::parse(Cursor::new(output)).unwrap();
    assert_eq!(reparsed, profile);
}
