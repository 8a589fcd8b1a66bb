//! 工具注册表：内置工具的封闭枚举与参数规范化
//!
//! 工具集是已知的封闭集合，用 ToolOp 枚举 + 静态表描述，而非动态 trait 注册。
//! 规范化负责把模型产出的各种别名参数（file_path / filepath / query / depth）
//! 折叠为规范键，并在工具不接受额外参数时按签名过滤未知键。

use serde_json::Map;

/// 内置工具操作。Bridge 统一代表需要编辑器桥接的操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOp {
    ReadFile,
    WriteFile,
    CreateFile,
    EditFile,
    ListDirectory,
    SearchInFiles,
    RunTerminalCommand,
    LogThought,
    Bridge,
}

/// 超时类别：通用 30s，桥接 15s（具体秒数来自配置）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Generic,
    Bridge,
}

/// 静态工具条目
#[derive(Debug, Clone, Copy)]
pub struct ToolEntry {
    pub name: &'static str,
    pub op: ToolOp,
    /// 规范化后允许的参数键。accepts_extra 为 true 时只作文档用途。
    pub params: &'static [&'static str],
    pub signature: &'static str,
    /// 桥接类工具透传未知键
    pub accepts_extra: bool,
    pub timeout: TimeoutClass,
    pub description: &'static str,
}

/// 全部内置工具
pub const BUILTIN_TOOLS: &[ToolEntry] = &[
    ToolEntry {
        name: "read_file",
        op: ToolOp::ReadFile,
        params: &["path", "start_line", "end_line"],
        signature: "read_file(path, start_line?, end_line?)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "读取文件内容，可选按 1 起始的行号区间截取",
    },
    ToolEntry {
        name: "write_file",
        op: ToolOp::WriteFile,
        params: &["path", "content"],
        signature: "write_file(path, content)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "写入（覆盖）文件内容，必要时创建父目录",
    },
    ToolEntry {
        name: "create_file",
        op: ToolOp::CreateFile,
        params: &["path", "content"],
        signature: "create_file(path, content?)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "创建新文件；文件已存在时失败",
    },
    ToolEntry {
        name: "edit_file",
        op: ToolOp::EditFile,
        params: &["path", "old_string", "new_string"],
        signature: "edit_file(path, old_string, new_string)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "按唯一匹配替换文件中的一段文本",
    },
    ToolEntry {
        name: "list_directory",
        op: ToolOp::ListDirectory,
        params: &["path", "max_depth"],
        signature: "list_directory(path?, max_depth?)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "列出目录内容，可限制递归深度",
    },
    ToolEntry {
        name: "search_in_files",
        op: ToolOp::SearchInFiles,
        params: &["pattern", "path", "is_regex"],
        signature: "search_in_files(pattern, path?, is_regex?)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "在工作区文件中搜索文本或正则",
    },
    ToolEntry {
        name: "run_terminal_command",
        op: ToolOp::RunTerminalCommand,
        params: &["command", "cwd"],
        signature: "run_terminal_command(command, cwd?)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "在工作区内执行 Shell 命令并返回输出",
    },
    ToolEntry {
        name: "log_thought",
        op: ToolOp::LogThought,
        params: &["thought"],
        signature: "log_thought(thought)",
        accepts_extra: false,
        timeout: TimeoutClass::Generic,
        description: "记录一条中间思考，不产生副作用",
    },
    ToolEntry {
        name: "get_workspace_structure",
        op: ToolOp::Bridge,
        params: &["path", "max_depth"],
        signature: "get_workspace_structure(path?, max_depth?)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "获取工作区目录树概览",
    },
    ToolEntry {
        name: "get_workspace_diagnostics",
        op: ToolOp::Bridge,
        params: &["path"],
        signature: "get_workspace_diagnostics(path?)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "获取编辑器诊断信息（错误 / 警告）",
    },
    ToolEntry {
        name: "get_active_file_context",
        op: ToolOp::Bridge,
        params: &[],
        signature: "get_active_file_context()",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "获取当前活跃文件与光标上下文",
    },
    ToolEntry {
        name: "get_file_outline",
        op: ToolOp::Bridge,
        params: &["path"],
        signature: "get_file_outline(path)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "获取文件的符号大纲",
    },
    ToolEntry {
        name: "find_references",
        op: ToolOp::Bridge,
        params: &["path", "line", "character"],
        signature: "find_references(path, line, character)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "查找符号的全部引用",
    },
    ToolEntry {
        name: "execute_vscode_command",
        op: ToolOp::Bridge,
        params: &["command", "args"],
        signature: "execute_vscode_command(command, args?)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "执行编辑器命令",
    },
    ToolEntry {
        name: "get_workspace_config",
        op: ToolOp::Bridge,
        params: &["section"],
        signature: "get_workspace_config(section?)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "读取工作区配置",
    },
    ToolEntry {
        name: "update_workspace_config",
        op: ToolOp::Bridge,
        params: &["section", "value"],
        signature: "update_workspace_config(section, value)",
        accepts_extra: true,
        timeout: TimeoutClass::Bridge,
        description: "更新工作区配置",
    },
];

/// path 的常见别名，规范化时折叠为 "path"
const PATH_ALIASES: &[&str] = &["file_path", "filepath", "file", "target", "directory", "folder"];

/// 按名称查找工具条目
pub fn lookup(name: &str) -> Option<&'static ToolEntry> {
    BUILTIN_TOOLS.iter().find(|t| t.name == name)
}

fn rename_key(args: &mut Map<String, serde_json::Value>, from: &str, to: &str) {
    if !args.contains_key(to) {
        if let Some(v) = args.remove(from) {
            args.insert(to.to_string(), v);
        }
    }
}

/// 参数规范化：别名折叠 + 签名过滤。对已规范的参数再次调用不改变结果。
pub fn normalize_args(
    entry: &ToolEntry,
    mut args: Map<String, serde_json::Value>,
) -> Map<String, serde_json::Value> {
    for alias in PATH_ALIASES {
        rename_key(&mut args, alias, "path");
    }
    if entry.name == "search_in_files" {
        rename_key(&mut args, "query", "pattern");
    }
    rename_key(&mut args, "depth", "max_depth");

    if !entry.accepts_extra {
        args.retain(|k, _| entry.params.contains(&k.as_str()));
    }
    args
}
