//! Starter content for newly opened files, keyed by extension.

/// Lowercase extension, or the whole lowercase name for extensionless
/// files such as `Makefile` and dotfiles such as `.gitignore`.
fn extension_key(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    match lower.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => lower,
    }
}

fn base_name(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((base, _)) if !base.is_empty() => base,
        _ => file_name,
    }
}

/// Editor language id for a file name.
pub fn language_for(file_name: &str) -> &'static str {
    match extension_key(file_name).as_str() {
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "vue" => "vue",
        "svelte" => "svelte",
        "css" | "scss" | "sass" | "less" => "css",
        "html" | "htm" => "html",
        "xml" | "svg" => "xml",
        "json" | "jsonc" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "ini" | "cfg" | "conf" => "ini",
        "csv" => "csv",
        "py" | "pyw" => "python",
        "java" => "java",
        "cpp" | "cc" | "cxx" => "cpp",
        "c" | "h" | "hpp" => "c",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "dart" => "dart",
        "lua" => "lua",
        "sh" | "bash" | "zsh" => "shell",
        "ps1" => "powershell",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        "dockerfile" => "dockerfile",
        "makefile" => "makefile",
        "gitignore" => "gitignore",
        "log" => "log",
        _ => "plaintext",
    }
}

/// Starter content for a file that has no content yet.
pub fn scaffold_for(file_name: &str) -> String {
    let base = base_name(file_name);
    match extension_key(file_name).as_str() {
        "js" => format!("// {file_name}\n\nconsole.log('Hello, World!');\n"),
        "jsx" => format!(
            "// {file_name}\n\nimport React from 'react';\n\nconst {base} = () => {{\n  return <h1>Hello World</h1>;\n}};\n\nexport default {base};\n"
        ),
        "ts" => format!(
            "// {file_name}\n\nconst greeting: string = 'Hello, World!';\nconsole.log(greeting);\n"
        ),
        "tsx" => format!(
            "// {file_name}\n\nimport React from 'react';\n\ninterface Props {{}}\n\nconst {base}: React.FC<Props> = () => {{\n  return <h1>Hello World</h1>;\n}};\n\nexport default {base};\n"
        ),
        "css" => format!("/* {file_name} */\n\n.container {{\n  margin: 0 auto;\n}}\n"),
        "html" => format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"UTF-8\">\n  <title>{base}</title>\n</head>\n<body>\n  <h1>{base}</h1>\n</body>\n</html>\n"
        ),
        "json" => format!("{{\n  \"name\": \"{base}\",\n  \"version\": \"1.0.0\"\n}}\n"),
        "yaml" | "yml" => format!("# {file_name}\n\nname: {base}\nversion: 1.0.0\n"),
        "toml" => format!("# {file_name}\n\n[package]\nname = \"{base}\"\nversion = \"1.0.0\"\n"),
        "md" => format!("# {base}\n\nAdd your content here.\n"),
        "py" => format!(
            "#!/usr/bin/env python3\n\"\"\"{file_name}\"\"\"\n\n\ndef main():\n    print(\"Hello, World!\")\n\n\nif __name__ == \"__main__\":\n    main()\n"
        ),
        "java" => format!(
            "public class {base} {{\n    public static void main(String[] args) {{\n        System.out.println(\"Hello, World!\");\n    }}\n}}\n"
        ),
        "c" => "#include <stdio.h>\n\nint main(void) {\n    printf(\"Hello, World!\\n\");\n    return 0;\n}\n"
            .to_string(),
        "cpp" | "cc" | "cxx" => "#include <iostream>\n\nint main() {\n    std::cout << \"Hello, World!\" << std::endl;\n    return 0;\n}\n"
            .to_string(),
        "go" => "package main\n\nimport \"fmt\"\n\nfunc main() {\n    fmt.Println(\"Hello, World!\")\n}\n"
            .to_string(),
        "rs" => format!("// {file_name}\n\nfn main() {{\n    println!(\"Hello, World!\");\n}}\n"),
        "rb" => format!("# {file_name}\n\nputs \"Hello, World!\"\n"),
        "sh" | "bash" => format!("#!/bin/bash\n# {file_name}\n\nset -e\n\necho \"Hello, World!\"\n"),
        "sql" => format!("-- {file_name}\n\nSELECT 1;\n"),
        "dockerfile" => format!("# {file_name}\n\nFROM alpine:3\n\nCMD [\"echo\", \"Hello, World!\"]\n"),
        "makefile" => format!("# {file_name}\n\n.PHONY: all\n\nall:\n\t@echo \"Building...\"\n"),
        "gitignore" => format!("# {file_name}\n\ntarget/\nnode_modules/\n.env\n"),
        _ => format!("// {file_name}\n\n// Add your content here\n"),
    }
}
