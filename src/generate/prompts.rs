use super::orchestrator::{GenerationMode, GenerationRequest};

pub const GENERATION_SYSTEM: &str = r#"You are an expert Python developer writing batch-processing scripts for a desktop toolbox.

Always respond with a single JSON object and nothing else:
{
  "name": "Human readable script name",
  "description": "One sentence describing what the script does",
  "packages": ["pip-distribution-name"],
  "code": "the complete Python source"
}

"packages" lists third-party PyPI distributions the script needs beyond the standard library and Pillow. Use [] when none are needed."#;

/// Structure every script in the library follows.
pub const SCRIPT_TEMPLATE: &str = r#"import os
import datetime
import argparse
from pathlib import Path
from PIL import Image

# --- Core Components for UI ---

NAME = "Script Name Here"
DESCRIPTION = "Brief description of what this script does"
INPUT_TYPES = "Images (*.png *.jpg *.jpeg *.webp *.bmp)"

PARAMETERS = [
    {
        "name": "example_param",
        "type": "int",
        "default": 100,
        "description": "What this parameter does"
    }
]

# --- Script Logic ---

def process_files(file_paths, **kwargs):
    home_dir = os.path.expanduser("~")
    script_name_slug = NAME.lower().replace(" ", "_")
    timestamp = datetime.datetime.now().strftime("%Y%m%d%H%M%S")
    output_folder_path = os.path.join(home_dir, "Downloads", script_name_slug, f"{timestamp}_output")
    os.makedirs(output_folder_path, exist_ok=True)

    for file_path in file_paths:
        try:
            print(f"Processing {file_path}...")
        except Exception as e:
            print(f"Error processing {file_path}: {e}")

    print(f"Processing complete. Output: {output_folder_path}")

# --- Command-Line Execution ---

def main():
    parser = argparse.ArgumentParser(description=DESCRIPTION)
    parser.add_argument("file_paths", nargs="+", help="Paths to input files")
    for param in PARAMETERS:
        parser.add_argument(f'--{param["name"]}', type=eval(param["type"]), default=param["default"])
    args = parser.parse_args()
    kwargs = {param["name"]: getattr(args, param["name"]) for param in PARAMETERS}
    process_files(args.file_paths, **kwargs)

if __name__ == "__main__":
    main()
"#;

const CONTRACT: &str = r#"REQUIREMENTS:
1. Define the module-level variables NAME, DESCRIPTION, INPUT_TYPES and PARAMETERS (a list of dicts with name, type, default, description; type is "int", "float", "str" or "bool").
2. Define the functions process_files(file_paths, **kwargs) and main().
3. Save outputs only to ~/Downloads/<script_name_slug>/<timestamp>_output/ built from os.path.expanduser("~").
4. Never write to relative folders such as "output/", "outputs/", "static/", "data/", "temp/" or "tmp/", and never open files with relative paths like "./file".
5. Handle errors per file with try/except and print a progress line for every file.
6. Include every import the script needs at the top of the file."#;

/// Prompt for the first attempt, chosen by the request's mode.
pub fn initial_prompt(request: &GenerationRequest) -> String {
    match (request.mode(), request.existing_code()) {
        (GenerationMode::Edit, Some(existing)) => edit_prompt(request.user_prompt(), existing),
        _ => create_prompt(request.user_prompt()),
    }
}

pub fn create_prompt(user_prompt: &str) -> String {
    format!(
        r#"TASK: Create a new processing script based on the user's request.

USER REQUEST: {user_prompt}

The script must follow this template structure exactly:

```python
{template}
```

{contract}

Choose a NAME and DESCRIPTION that match what the script does and define sensible PARAMETERS the user can configure."#,
        user_prompt = user_prompt,
        template = SCRIPT_TEMPLATE,
        contract = CONTRACT,
    )
}

pub fn edit_prompt(user_prompt: &str, existing_code: &str) -> String {
    format!(
        r#"TASK: Modify the existing script based on the user's request.

EXISTING SCRIPT:
```python
{existing}
```

USER REQUEST: {user_prompt}

{contract}

Keep existing functionality unless told to remove it, keep the same NAME unless the user asks to rename it, update DESCRIPTION if the behaviour changes, and return the COMPLETE modified script."#,
        existing = existing_code,
        user_prompt = user_prompt,
        contract = CONTRACT,
    )
}

/// Prompt for attempts after the first: the previous candidate and the exact
/// validation error become the repair target.
pub fn retry_prompt(user_prompt: &str, previous_code: &str, validation_error: &str) -> String {
    format!(
        r#"TASK: Your previous script for this request failed validation. Fix it.

ORIGINAL USER REQUEST: {user_prompt}

PREVIOUS SCRIPT:
```python
{previous}
```

VALIDATION ERROR:
{error}

{contract}

Return the COMPLETE corrected script in the same JSON format."#,
        user_prompt = user_prompt,
        previous = previous_code,
        error = validation_error,
        contract = CONTRACT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_prompt_follows_mode() {
        let create = GenerationRequest::create("add film grain");
        let prompt = initial_prompt(&create);
        assert!(prompt.contains("Create a new processing script"));
        assert!(prompt.contains("add film grain"));
        assert!(prompt.contains("def process_files(file_paths, **kwargs):"));

        let edit = GenerationRequest::edit("make it blue", "NAME = \"Tint\"\n");
        let prompt = initial_prompt(&edit);
        assert!(prompt.contains("Modify the existing script"));
        assert!(prompt.contains("NAME = \"Tint\""));
        assert!(prompt.contains("make it blue"));
    }

    #[test]
    fn test_retry_prompt_embeds_previous_attempt_verbatim() {
        let prompt = retry_prompt(
            "resize images",
            "NAME = 'Resize'\n",
            "Missing required definitions: main()",
        );
        assert!(prompt.contains("ORIGINAL USER REQUEST: resize images"));
        assert!(prompt.contains("NAME = 'Resize'"));
        assert!(prompt.contains("VALIDATION ERROR:\nMissing required definitions: main()"));
    }

    #[test]
    fn test_template_satisfies_its_own_contract() {
        let validator = crate::generate::StructuralValidator::new();
        assert!(validator.validate_structure(SCRIPT_TEMPLATE).is_valid());
    }
}
