//! Embedding-format capability interface.
//!
//! A shader test case is a harness file with a compute shader embedded in
//! it. Everything format-specific lives behind [`HarnessFormat`]: how the
//! tool is invoked, how success is recognized in its output streams, and
//! how the shader body is cut out of / spliced back into the harness. The
//! implementation is selected once, at configuration time, by tool name.

/// A fully assembled tool command line, relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
}

/// File the amber-style tool dumps its bound buffers into.
pub const RESULT_FILE: &str = "buffer_result.txt";

const SHADERTRAP_BEGIN: &str = "DECLARE_SHADER shader KIND COMPUTE";
const AMBER_BEGIN: &str = "SHADER compute shader GLSL";

pub trait HarnessFormat {
    fn name(&self) -> &'static str;

    /// Build the backend invocation for one run. `add_id_only` requests only
    /// the first declared buffer (the instrumentation ids buffer).
    fn build_invocation(
        &self,
        tool_path: &str,
        renderer: &str,
        shader_file: &str,
        shader_text: &str,
        add_id_only: bool,
    ) -> ToolInvocation;

    /// Whether the tool run succeeded, judged purely on its output streams.
    /// Exit codes are not trusted.
    fn run_succeeded(&self, stdout: &str, stderr: &str) -> bool;

    /// Cut the embedded shader body out of a harness file.
    fn extract_embedded_source(&self, harness_text: &str) -> String;

    /// Splice a shader body back into a harness file, replacing the embedded
    /// one.
    fn merge_embedded_source(&self, harness_text: &str, shader_source: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderTrapFormat;

#[derive(Debug, Clone, Copy, Default)]
pub struct AmberFormat;

pub static SHADERTRAP: ShaderTrapFormat = ShaderTrapFormat;
pub static AMBER: AmberFormat = AmberFormat;

pub fn format_for(name: &str) -> Option<&'static dyn HarnessFormat> {
    match name {
        "shadertrap" => Some(&SHADERTRAP),
        "amber" => Some(&AMBER),
        _ => None,
    }
}

/// `BUFFER <name> AS storage DESCRIPTOR_SET <set> BINDING <binding>` lines,
/// in declaration order.
pub fn amber_buffer_bindings(shader_text: &str) -> Vec<(String, String, String)> {
    let mut bindings = Vec::new();
    for line in shader_text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() >= 8
            && tokens[0] == "BUFFER"
            && tokens[2] == "AS"
            && tokens[3] == "storage"
            && tokens[4] == "DESCRIPTOR_SET"
            && tokens[6] == "BINDING"
        {
            bindings.push((
                tokens[1].to_string(),
                tokens[5].to_string(),
                tokens[7].to_string(),
            ));
        }
    }
    bindings
}

fn extract_between(harness_text: &str, begin_marker: &str) -> String {
    let mut keeping = false;
    let mut body = String::new();
    for line in harness_text.split_inclusive('\n') {
        if line.contains("END") {
            keeping = false;
        }
        if keeping {
            body.push_str(line);
        }
        if line.contains(begin_marker) {
            keeping = true;
        }
    }
    body
}

fn merge_between(harness_text: &str, shader_source: &str, begin_marker: &str) -> String {
    let mut keeping = true;
    let mut merged = String::new();
    for line in harness_text.split_inclusive('\n') {
        if line.contains("END\n") {
            keeping = true;
            merged.push('\n');
        }
        if keeping {
            merged.push_str(line);
        }
        if line.contains(begin_marker) {
            keeping = false;
            merged.push_str(shader_source);
        }
    }
    merged
}

impl HarnessFormat for ShaderTrapFormat {
    fn name(&self) -> &'static str {
        "shadertrap"
    }

    fn build_invocation(
        &self,
        tool_path: &str,
        renderer: &str,
        shader_file: &str,
        _shader_text: &str,
        _add_id_only: bool,
    ) -> ToolInvocation {
        ToolInvocation {
            program: tool_path.to_string(),
            args: vec![
                shader_file.to_string(),
                "--require-vendor-renderer-substring".to_string(),
                renderer.to_string(),
            ],
        }
    }

    fn run_succeeded(&self, _stdout: &str, stderr: &str) -> bool {
        stderr.contains("SUCCESS!")
    }

    fn extract_embedded_source(&self, harness_text: &str) -> String {
        extract_between(harness_text, SHADERTRAP_BEGIN)
    }

    fn merge_embedded_source(&self, harness_text: &str, shader_source: &str) -> String {
        merge_between(harness_text, shader_source, SHADERTRAP_BEGIN)
    }
}

impl HarnessFormat for AmberFormat {
    fn name(&self) -> &'static str {
        "amber"
    }

    fn build_invocation(
        &self,
        tool_path: &str,
        _renderer: &str,
        shader_file: &str,
        shader_text: &str,
        add_id_only: bool,
    ) -> ToolInvocation {
        let mut args = vec![
            "-d".to_string(),
            "-b".to_string(),
            RESULT_FILE.to_string(),
        ];
        let bindings = amber_buffer_bindings(shader_text);
        let requested: &[(String, String, String)] = if add_id_only {
            &bindings[..bindings.len().min(1)]
        } else {
            &bindings
        };
        for (_, _, binding) in requested {
            args.push("-B".to_string());
            args.push(binding.clone());
        }
        args.push(shader_file.to_string());
        ToolInvocation {
            program: tool_path.to_string(),
            args,
        }
    }

    fn run_succeeded(&self, stdout: &str, _stderr: &str) -> bool {
        stdout.contains("1 pass")
    }

    fn extract_embedded_source(&self, harness_text: &str) -> String {
        extract_between(harness_text, AMBER_BEGIN)
    }

    fn merge_embedded_source(&self, harness_text: &str, shader_source: &str) -> String {
        merge_between(harness_text, shader_source, AMBER_BEGIN)
    }
}
